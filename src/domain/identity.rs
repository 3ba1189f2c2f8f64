use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identity
// ============================================================================
//
// The identity provider authenticates callers and hands the engine a
// principal. The engine trusts it and only checks role and ownership.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    Staff,
    Delivery,
    Customer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::Staff => "STAFF",
            Role::Delivery => "DELIVERY",
            Role::Customer => "CUSTOMER",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ADMIN" => Some(Role::Admin),
            "MANAGER" => Some(Role::Manager),
            "STAFF" => Some(Role::Staff),
            "DELIVERY" => Some(Role::Delivery),
            "CUSTOMER" => Some(Role::Customer),
            _ => None,
        }
    }

    /// Administrators may drive any delivery regardless of assignment
    pub fn is_administrator(self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

/// Authenticated caller as supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    pub is_active: bool,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role,
            is_active: true,
        }
    }

    pub fn is_delivery_actor(&self) -> bool {
        self.is_active && self.role == Role::Delivery
    }

    pub fn is_administrator(&self) -> bool {
        self.is_active && self.role.is_administrator()
    }
}

/// User row mirrored from the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
}

impl UserRecord {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            role: self.role,
            is_active: self.is_active,
        }
    }

    pub fn can_carry_deliveries(&self) -> bool {
        self.is_active && self.role == Role::Delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_storage_name() {
        for role in [Role::Admin, Role::Manager, Role::Staff, Role::Delivery, Role::Customer] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("driver"), None);
    }

    #[test]
    fn test_inactive_principal_has_no_privileges() {
        let mut admin = Principal::new(Uuid::new_v4(), Role::Admin);
        assert!(admin.is_administrator());
        admin.is_active = false;
        assert!(!admin.is_administrator());

        let mut courier = Principal::new(Uuid::new_v4(), Role::Delivery);
        assert!(courier.is_delivery_actor());
        courier.is_active = false;
        assert!(!courier.is_delivery_actor());
    }
}
