use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use shared::Actor;
use uuid::Uuid;

use crate::error::EngineError;

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ID_HEADER: &str = "x-actor-id";

/// The authenticated caller, as asserted by the gateway in front of the
/// service.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Actor);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        };

        let role = header(ROLE_HEADER)
            .ok_or_else(|| EngineError::Unauthenticated(format!("missing {ROLE_HEADER} header")))?;
        let id = header(ID_HEADER);
        Ok(Caller(parse_actor(role, id)?))
    }
}

pub fn parse_actor(role: &str, id: Option<&str>) -> Result<Actor, EngineError> {
    if role.eq_ignore_ascii_case("system") {
        return Err(EngineError::Unauthenticated("system role cannot be asserted over HTTP".to_string()));
    }

    let id = id
        .ok_or_else(|| EngineError::Unauthenticated(format!("missing {ID_HEADER} header")))?
        .parse::<Uuid>()
        .map_err(|_| EngineError::Unauthenticated(format!("{ID_HEADER} is not a valid id")))?;

    match role.to_ascii_lowercase().as_str() {
        "admin" => Ok(Actor::Admin(id)),
        "vendor" => Ok(Actor::Vendor(id)),
        "buyer" | "customer" => Ok(Actor::Buyer(id)),
        "delivery_partner" | "rider" => Ok(Actor::DeliveryPartner(id)),
        other => Err(EngineError::Unauthenticated(format!("unknown role {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roles() {
        let id = Uuid::new_v4();
        let raw = id.to_string();
        assert_eq!(parse_actor("Buyer", Some(&raw)).unwrap(), Actor::Buyer(id));
        assert_eq!(parse_actor("rider", Some(&raw)).unwrap(), Actor::DeliveryPartner(id));
        assert_eq!(parse_actor("admin", Some(&raw)).unwrap(), Actor::Admin(id));
    }

    #[test]
    fn test_rejects_system_and_garbage() {
        let raw = Uuid::new_v4().to_string();
        assert!(matches!(parse_actor("system", Some(&raw)), Err(EngineError::Unauthenticated(_))));
        assert!(matches!(parse_actor("buyer", Some("nope")), Err(EngineError::Unauthenticated(_))));
        assert!(matches!(parse_actor("buyer", None), Err(EngineError::Unauthenticated(_))));
        assert!(matches!(parse_actor("pirate", Some(&raw)), Err(EngineError::Unauthenticated(_))));
    }
}
