// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Coarse role tags carried on users and in access tokens.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// User roles. New registrations are customers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Farmer,
    Support,
    Finance,
    Admin,
    Superadmin,
}
