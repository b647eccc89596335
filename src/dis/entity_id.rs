use std::fmt::{Debug, Display, Formatter};

use bytes::{Buf, BufMut};

use crate::dis::pdu_error::DecodeError;
use crate::util::buf_ext::WireBufExt;

/// The DIS (site, application, entity) triple naming a simulated participant. For chat, it
///  identifies the sender of a message and is the key of the user roster.
///
/// The all-zero id means 'no site / application / entity'.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntityId {
    pub site: u16,
    pub application: u16,
    pub entity: u16,
}

impl EntityId {
    pub const SERIALIZED_LEN: usize = 6;

    pub const NONE: EntityId = EntityId::new(0, 0, 0);

    pub const fn new(site: u16, application: u16, entity: u16) -> EntityId {
        EntityId {
            site,
            application,
            entity,
        }
    }

    pub fn with_site(self, site: u16) -> EntityId {
        EntityId { site, ..self }
    }

    pub fn with_application(self, application: u16) -> EntityId {
        EntityId { application, ..self }
    }

    pub fn with_entity(self, entity: u16) -> EntityId {
        EntityId { entity, ..self }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.site);
        buf.put_u16(self.application);
        buf.put_u16(self.entity);
    }

    pub fn try_deser(buf: &mut impl Buf) -> Result<EntityId, DecodeError> {
        buf.ensure_remaining(Self::SERIALIZED_LEN, "entity id")?;
        Ok(EntityId {
            site: buf.get_u16(),
            application: buf.get_u16(),
            entity: buf.get_u16(),
        })
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.site, self.application, self.entity)
    }
}

impl Debug for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self)
    }
}
