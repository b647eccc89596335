use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::dis::comment_pdu::CommentPdu;
use crate::dis::entity_id::EntityId;
use crate::messaging::receive_pipeline::{DEFAULT_INBOUND_QUEUE_CAPACITY, MAX_PDU_SIZE};
use crate::messaging::transport::UdpSocketOpener;

/// the port DIS traffic conventionally uses
pub const DIS_DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a number between 0 and {max}, was {value:?}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        max: u32,
    },
    #[error("{0:?} is not an entity id of the form site:application:entity")]
    InvalidEntityId(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IdComponent {
    Site,
    Application,
    Entity,
}

impl IdComponent {
    pub fn name(&self) -> &'static str {
        match self {
            IdComponent::Site => "site id",
            IdComponent::Application => "application id",
            IdComponent::Entity => "entity id",
        }
    }

    pub fn apply(&self, id: EntityId, value: u16) -> EntityId {
        match self {
            IdComponent::Site => id.with_site(value),
            IdComponent::Application => id.with_application(value),
            IdComponent::Entity => id.with_entity(value),
        }
    }
}

pub fn parse_id_component(field: &'static str, text: &str) -> Result<u16, ConfigError> {
    text.trim().parse()
        .map_err(|_| ConfigError::InvalidNumber { field, value: text.to_string(), max: u16::MAX.into() })
}

pub fn parse_exercise_id(text: &str) -> Result<u8, ConfigError> {
    text.trim().parse()
        .map_err(|_| ConfigError::InvalidNumber { field: "exercise id", value: text.to_string(), max: u8::MAX.into() })
}

/// parses the `site:application:entity` form that [EntityId]'s `Display` produces
impl FromStr for EntityId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split(':').collect::<Vec<_>>();
        if parts.len() != 3 {
            return Err(ConfigError::InvalidEntityId(s.to_string()));
        }

        Ok(EntityId::new(
            parse_id_component(IdComponent::Site.name(), parts[0])?,
            parse_id_component(IdComponent::Application.name(), parts[1])?,
            parse_id_component(IdComponent::Entity.name(), parts[2])?,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// The address all chat traffic is sent to. If it is a multicast address, the group is joined
    ///  on connect; otherwise it is used for plain (unicast or broadcast) UDP.
    pub group_addr: SocketAddr,

    pub sender_id: EntityId,
    pub receiver_id: EntityId,
    pub exercise_id: u8,
    pub username: String,

    pub inbound_queue_capacity: usize,
    /// size of the receive buffer
    pub max_pdu_size: usize,

    pub multicast_ttl: u32,
    /// a chat session depends on receiving its own traffic to show up in its own roster
    pub multicast_loop: bool,
}

impl ChatConfig {
    pub fn new(group_addr: SocketAddr, sender_id: EntityId, username: &str) -> ChatConfig {
        ChatConfig {
            group_addr,
            sender_id,
            receiver_id: EntityId::NONE,
            exercise_id: 1,
            username: username.to_string(),
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
            max_pdu_size: MAX_PDU_SIZE,
            multicast_ttl: 1,
            multicast_loop: true,
        }
    }

    pub fn default_group_addr() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(239, 1, 2, 3), DIS_DEFAULT_PORT))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_addr.port() == 0 {
            return Err(ConfigError::Invalid(format!("group address {} has no port", self.group_addr)));
        }
        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("inbound queue capacity must be positive".to_string()));
        }
        if self.max_pdu_size < CommentPdu::MIN_LEN || self.max_pdu_size > CommentPdu::MAX_LEN {
            return Err(ConfigError::Invalid(format!("max PDU size must be between {} and {}, was {}",
                CommentPdu::MIN_LEN, CommentPdu::MAX_LEN, self.max_pdu_size)));
        }
        if self.sender_id.is_none() {
            return Err(ConfigError::Invalid("sender id must not be 0:0:0".to_string()));
        }
        Ok(())
    }

    pub fn socket_opener(&self) -> UdpSocketOpener {
        UdpSocketOpener {
            multicast_ttl: self.multicast_ttl,
            multicast_loop: self.multicast_loop,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple("1:1:100", Some(EntityId::new(1, 1, 100)))]
    #[case::whitespace(" 1: 2 :3 ", Some(EntityId::new(1, 2, 3)))]
    #[case::max("65535:65535:65535", Some(EntityId::new(65535, 65535, 65535)))]
    #[case::overflow("65536:1:1", None)]
    #[case::negative("-1:1:1", None)]
    #[case::non_numeric("a:b:c", None)]
    #[case::too_few("1:2", None)]
    #[case::too_many("1:2:3:4", None)]
    #[case::empty("", None)]
    fn test_parse_entity_id(#[case] s: &str, #[case] expected: Option<EntityId>) {
        assert_eq!(s.parse::<EntityId>().ok(), expected);
    }

    #[test]
    fn test_entity_id_display_parses_back() {
        let id = EntityId::new(12, 345, 6789);
        assert_eq!(id.to_string().parse::<EntityId>(), Ok(id));
    }

    #[rstest]
    #[case("0", Ok(0))]
    #[case("65535", Ok(65535))]
    #[case(" 42 ", Ok(42))]
    #[case("65536", Err(ConfigError::InvalidNumber { field: "site id", value: "65536".to_string(), max: 65535 }))]
    #[case("abc", Err(ConfigError::InvalidNumber { field: "site id", value: "abc".to_string(), max: 65535 }))]
    fn test_parse_id_component(#[case] text: &str, #[case] expected: Result<u16, ConfigError>) {
        assert_eq!(parse_id_component("site id", text), expected);
    }

    #[rstest]
    #[case("5", Some(5))]
    #[case("255", Some(255))]
    #[case("256", None)]
    #[case("", None)]
    #[case("five", None)]
    fn test_parse_exercise_id(#[case] text: &str, #[case] expected: Option<u8>) {
        assert_eq!(parse_exercise_id(text).ok(), expected);
    }

    #[rstest]
    #[case::site(IdComponent::Site, EntityId::new(9, 2, 3))]
    #[case::application(IdComponent::Application, EntityId::new(1, 9, 3))]
    #[case::entity(IdComponent::Entity, EntityId::new(1, 2, 9))]
    fn test_id_component_apply(#[case] component: IdComponent, #[case] expected: EntityId) {
        assert_eq!(component.apply(EntityId::new(1, 2, 3), 9), expected);
    }

    #[test]
    fn test_error_message() {
        let err = parse_exercise_id("x").unwrap_err();
        assert_eq!(err.to_string(), "exercise id must be a number between 0 and 255, was \"x\"");
    }

    #[test]
    fn test_validate() {
        let config = ChatConfig::new(ChatConfig::default_group_addr(), EntityId::new(1, 1, 100), "alice");
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.group_addr.set_port(0);
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.inbound_queue_capacity = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.max_pdu_size = 10;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.sender_id = EntityId::NONE;
        assert!(invalid.validate().is_err());
    }
}
