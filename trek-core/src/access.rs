use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Guest,
    Customer,
    Partner,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "GUEST" => Some(Role::Guest),
            "CUSTOMER" => Some(Role::Customer),
            "PARTNER" => Some(Role::Partner),
            "ADMIN" => Some(Role::Admin),
            "SUPER_ADMIN" => Some(Role::SuperAdmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "GUEST",
            Role::Customer => "CUSTOMER",
            Role::Partner => "PARTNER",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

/// Whoever is calling into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub role: Role,
    pub partner_id: Option<String>,
}

impl Actor {
    pub fn guest() -> Self {
        Self { user_id: None, email: None, role: Role::Guest, partner_id: None }
    }

    pub fn customer(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), email: None, role: Role::Customer, partner_id: None }
    }

    pub fn partner(user_id: impl Into<String>, partner_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            email: None,
            role: Role::Partner,
            partner_id: Some(partner_id.into()),
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), email: None, role: Role::Admin, partner_id: None }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Ownership facts of a resource, enough to decide visibility.
#[derive(Debug, Clone, Copy)]
pub enum ResourceKind<'a> {
    Schedule { partner_id: Option<&'a str> },
    Booking { user_id: Option<&'a str>, partner_id: Option<&'a str> },
    PaymentSession { user_id: Option<&'a str> },
}

fn same(a: Option<&str>, b: Option<&str>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Admins see everything, partners see what hangs off their own schedules,
/// customers see what they own, guests see nothing.
pub fn can_access(actor: &Actor, resource: ResourceKind<'_>) -> bool {
    if actor.is_admin() {
        return true;
    }
    let partner = actor.partner_id.as_deref();
    let user = actor.user_id.as_deref();

    match (actor.role, resource) {
        (Role::Partner, ResourceKind::Schedule { partner_id }) => same(partner, partner_id),
        (Role::Partner, ResourceKind::Booking { partner_id, .. }) => same(partner, partner_id),
        (Role::Customer, ResourceKind::Booking { user_id, .. }) => same(user, user_id),
        (Role::Customer | Role::Partner, ResourceKind::PaymentSession { user_id }) => same(user, user_id),
        _ => false,
    }
}

/// Storage-side form of `can_access` for booking listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingScope {
    All,
    Partner(String),
    User(String),
    Nothing,
}

impl BookingScope {
    pub fn for_actor(actor: &Actor) -> Self {
        if actor.is_admin() {
            return BookingScope::All;
        }
        match (actor.role, &actor.partner_id, &actor.user_id) {
            (Role::Partner, Some(partner_id), _) => BookingScope::Partner(partner_id.clone()),
            (Role::Customer, _, Some(user_id)) => BookingScope::User(user_id.clone()),
            _ => BookingScope::Nothing,
        }
    }
}
