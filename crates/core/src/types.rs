//! Core type definitions

use crate::MushError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Database reference number (`#N`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DbRef(pub i64);

impl DbRef {
    /// The "no object" reference, `#-1`
    pub const NOTHING: DbRef = DbRef(-1);

    pub const fn new(number: i64) -> Self {
        Self(number)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    pub fn is_nothing(&self) -> bool {
        self.0 < 0
    }
}

impl From<i64> for DbRef {
    fn from(number: i64) -> Self {
        Self(number)
    }
}

impl fmt::Display for DbRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for DbRef {
    type Err = MushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| MushError::InvalidData(format!("not a dbref: {}", s)))?;
        digits
            .parse::<i64>()
            .map(DbRef)
            .map_err(|_| MushError::InvalidData(format!("not a dbref: {}", s)))
    }
}

/// A reference to an object, optionally pinned to a creation timestamp.
///
/// `#N` is a bare reference and matches whichever object currently holds
/// number `N`. `#N:T` is an identity reference (an objid) and matches only
/// when the creation timestamp agrees as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub number: DbRef,
    pub created: Option<i64>,
}

impl ObjectRef {
    pub const fn bare(number: DbRef) -> Self {
        Self { number, created: None }
    }

    pub const fn identified(number: DbRef, created: i64) -> Self {
        Self {
            number,
            created: Some(created),
        }
    }

    pub fn is_bare(&self) -> bool {
        self.created.is_none()
    }

    pub fn matches(&self, object: &SharpObject) -> bool {
        self.number == object.dbref && self.created.map_or(true, |ts| ts == object.created)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.created {
            Some(ts) => write!(f, "{}:{}", self.number, ts),
            None => write!(f, "{}", self.number),
        }
    }
}

impl FromStr for ObjectRef {
    type Err = MushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some((number, created)) => {
                let created = created
                    .parse::<i64>()
                    .map_err(|_| MushError::InvalidData(format!("bad objid timestamp: {}", s)))?;
                Ok(Self::identified(number.parse()?, created))
            }
            None => Ok(Self::bare(s.parse()?)),
        }
    }
}

/// Object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Player,
    Thing,
    Exit,
    Room,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Player => "PLAYER",
            ObjectType::Thing => "THING",
            ObjectType::Exit => "EXIT",
            ObjectType::Room => "ROOM",
        }
    }
}

impl FromStr for ObjectType {
    type Err = MushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAYER" => Ok(ObjectType::Player),
            "THING" => Ok(ObjectType::Thing),
            "EXIT" => Ok(ObjectType::Exit),
            "ROOM" => Ok(ObjectType::Room),
            _ => Err(MushError::InvalidData(format!("unknown object type: {}", s))),
        }
    }
}

/// An object in the world database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharpObject {
    pub dbref: DbRef,
    /// Creation timestamp in milliseconds
    pub created: i64,
    pub kind: ObjectType,
    pub name: String,
    pub owner: DbRef,
    pub location: Option<DbRef>,
    pub parent: Option<DbRef>,
    pub zone: Option<DbRef>,
    /// Flag names, upper case
    pub flags: BTreeSet<String>,
    /// Power names, upper case
    pub powers: BTreeSet<String>,
}

impl SharpObject {
    pub fn new(dbref: DbRef, created: i64, kind: ObjectType, name: impl Into<String>) -> Self {
        Self {
            dbref,
            created,
            kind,
            name: name.into(),
            owner: dbref,
            location: None,
            parent: None,
            zone: None,
            flags: BTreeSet::new(),
            powers: BTreeSet::new(),
        }
    }

    pub fn objid(&self) -> ObjectRef {
        ObjectRef::identified(self.dbref, self.created)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(&flag.to_ascii_uppercase())
    }

    pub fn has_power(&self, power: &str) -> bool {
        self.powers.contains(&power.to_ascii_uppercase())
    }

    pub fn is_wizard(&self) -> bool {
        self.has_flag("WIZARD")
    }
}
