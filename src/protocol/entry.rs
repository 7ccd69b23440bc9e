//! Directory entries.
//!
//! A listed resource is an ordered list of typed attributes ("atoms"). The
//! tag of each atom carries a type bit telling whether its value is a
//! string or an integer, which is all the decoder needs to know to walk the
//! payload.
use super::{
    ChannelError, CommandId,
    field::{PayloadReader, PayloadWriter},
};

/// Attribute tags. The low bits select the value type.
pub mod tag {
    pub const STRING: u32 = 0x01;
    pub const LONG: u32 = 0x02;
    pub const TIME: u32 = 0x04 | LONG;
    pub const SIZE: u32 = 0x08 | LONG;
    pub const USER: u32 = 0x10 | STRING;
    pub const GROUP: u32 = 0x20 | STRING;
    pub const NAME: u32 = 0x40 | STRING;
    pub const ACCESS: u32 = 0x80 | LONG;
    pub const MODIFICATION_TIME: u32 = 0x100 | TIME;
    pub const ACCESS_TIME: u32 = 0x200 | TIME;
    pub const CREATION_TIME: u32 = 0x400 | TIME;
    pub const FILE_TYPE: u32 = 0x800 | LONG;
    pub const LINK_DEST: u32 = 0x1000 | STRING;
    pub const URL: u32 = 0x2000 | STRING;
    pub const MIME_TYPE: u32 = 0x4000 | STRING;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomValue {
    Long(u64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub tag: u32,
    pub value: AtomValue,
}

/// One listed resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    atoms: Vec<Atom>,
}

impl DirectoryEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an integer attribute. The tag must carry [`tag::LONG`].
    pub fn with_long(mut self, tag: u32, value: u64) -> Self {
        debug_assert!(tag & tag::LONG != 0, "tag {tag:#x} is not an integer tag");
        self.atoms.push(Atom {
            tag,
            value: AtomValue::Long(value),
        });
        self
    }

    /// Appends a string attribute. The tag must carry [`tag::STRING`].
    pub fn with_str(mut self, tag: u32, value: impl Into<String>) -> Self {
        debug_assert!(tag & tag::STRING != 0, "tag {tag:#x} is not a string tag");
        self.atoms.push(Atom {
            tag,
            value: AtomValue::Str(value.into()),
        });
        self
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn long(&self, tag: u32) -> Option<u64> {
        self.atoms.iter().find_map(|atom| match &atom.value {
            AtomValue::Long(v) if atom.tag == tag => Some(*v),
            _ => None,
        })
    }

    pub fn str(&self, tag: u32) -> Option<&str> {
        self.atoms.iter().find_map(|atom| match &atom.value {
            AtomValue::Str(v) if atom.tag == tag => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.str(tag::NAME)
    }

    pub fn size(&self) -> Option<u64> {
        self.long(tag::SIZE)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        let mut out = PayloadWriter::new();
        out.hex8("atom count", self.atoms.len() as u64)?;

        for atom in &self.atoms {
            out.hex8("atom tag", u64::from(atom.tag))?;
            match (&atom.value, atom.tag & tag::LONG != 0) {
                (AtomValue::Long(v), true) => {
                    out.hex8("atom value", *v)?;
                }
                (AtomValue::Str(s), false) if atom.tag & tag::STRING != 0 => {
                    out.string("atom value", s)?;
                }
                _ => {
                    return Err(ChannelError::Malformed {
                        command: CommandId::ListEntry,
                        reason: format!("atom {:#x} value does not match its tag", atom.tag),
                    });
                }
            }
        }

        Ok(out.finish())
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Self, ChannelError> {
        let mut input = PayloadReader::new(CommandId::ListEntry, payload);
        let count = input.hex8()?;
        let mut atoms = Vec::new();

        for _ in 0..count {
            let tag = input.hex8()? as u32;
            let value = if tag & tag::LONG != 0 {
                AtomValue::Long(input.hex8()?)
            } else if tag & tag::STRING != 0 {
                AtomValue::Str(input.string()?)
            } else {
                return Err(ChannelError::Malformed {
                    command: CommandId::ListEntry,
                    reason: format!("atom tag {tag:#x} has no type bit"),
                });
            };
            atoms.push(Atom { tag, value });
        }

        Ok(Self { atoms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DirectoryEntry {
        DirectoryEntry::new()
            .with_str(tag::NAME, "notes.txt")
            .with_long(tag::SIZE, 1234)
            .with_long(tag::MODIFICATION_TIME, 1_700_000_000)
            .with_str(tag::USER, "root")
            .with_long(tag::ACCESS, 0o644)
    }

    #[test]
    fn entry_layout() {
        let payload = DirectoryEntry::new()
            .with_str(tag::NAME, "a")
            .with_long(tag::SIZE, 2)
            .encode()
            .unwrap();

        assert_eq!(
            payload,
            b"       2_      41_a\0       a_       2_".to_vec()
        );
    }

    #[test]
    fn entry_decodes() {
        let entry = sample();
        let decoded = DirectoryEntry::decode(&entry.encode().unwrap()).unwrap();

        assert_eq!(decoded, entry);
        assert_eq!(decoded.name(), Some("notes.txt"));
        assert_eq!(decoded.size(), Some(1234));
        assert_eq!(decoded.str(tag::USER), Some("root"));
    }

    #[test]
    fn empty_entry() {
        let decoded = DirectoryEntry::decode(&DirectoryEntry::new().encode().unwrap()).unwrap();
        assert!(decoded.atoms().is_empty());
    }

    #[test]
    fn truncated_entry_is_malformed() {
        let payload = sample().encode().unwrap();
        assert!(DirectoryEntry::decode(&payload[..payload.len() - 3]).is_err());
    }

    #[test]
    fn untyped_tag_is_malformed() {
        let payload = b"       1_     100_".to_vec();
        assert!(matches!(
            DirectoryEntry::decode(&payload),
            Err(ChannelError::Malformed { .. })
        ));
    }
}
