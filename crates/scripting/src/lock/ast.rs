//! Lock expression tree

use mush_core::ObjectRef;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockExpr {
    Or(Box<LockExpr>, Box<LockExpr>),
    And(Box<LockExpr>, Box<LockExpr>),
    Not(Box<LockExpr>),
    /// Parenthesised sub-expression, kept so rendering preserves shape
    Group(Box<LockExpr>),
    Atom(LockAtom),
}

/// The object an object atom refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTarget {
    /// `#N` or `#N:T`
    Ref(ObjectRef),
    /// `me`, `here`, or an object name, resolved when the lock is set
    Name(String),
}

impl LockTarget {
    pub fn object_ref(&self) -> Option<ObjectRef> {
        match self {
            LockTarget::Ref(r) => Some(*r),
            LockTarget::Name(_) => None,
        }
    }
}

impl From<ObjectRef> for LockTarget {
    fn from(r: ObjectRef) -> Self {
        LockTarget::Ref(r)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAtom {
    True,
    False,
    /// `#N`: the unlocker is the object or carries it
    Bare(LockTarget),
    /// `=#N`: the unlocker is the object
    Exact(LockTarget),
    /// `+#N`: the unlocker carries the object
    Carry(LockTarget),
    /// `$#N`: the unlocker has the same owner as the object
    Owner(LockTarget),
    /// `@#N` or `@#N/Type`: whatever that object's lock says
    Indirect {
        object: LockTarget,
        lock: Option<String>,
    },
    Type(String),
    Name(String),
    Flag(String),
    Power(String),
    DbRefList(String),
    Ip(String),
    Hostname(String),
    Channel(String),
    /// `ATTR:pattern` on the unlocker
    Attribute { name: String, pattern: String },
    /// `ATTR/value`: the gated object's attribute, evaluated for the unlocker
    Evaluation { name: String, value: String },
}

impl LockExpr {
    /// Every object target in the tree, left to right
    pub fn targets(&self) -> Vec<LockTarget> {
        let mut targets = Vec::new();
        self.visit_atoms(&mut |atom| {
            if let Some(t) = atom.target() {
                targets.push(t.clone());
            }
        });
        targets
    }

    pub fn visit_atoms(&self, f: &mut impl FnMut(&LockAtom)) {
        match self {
            LockExpr::Or(a, b) | LockExpr::And(a, b) => {
                a.visit_atoms(f);
                b.visit_atoms(f);
            }
            LockExpr::Not(inner) | LockExpr::Group(inner) => inner.visit_atoms(f),
            LockExpr::Atom(atom) => f(atom),
        }
    }

    /// Rebuild the tree with every object target passed through `f`
    pub fn map_targets(&self, f: &impl Fn(&LockTarget) -> LockTarget) -> LockExpr {
        match self {
            LockExpr::Or(a, b) => {
                LockExpr::Or(Box::new(a.map_targets(f)), Box::new(b.map_targets(f)))
            }
            LockExpr::And(a, b) => {
                LockExpr::And(Box::new(a.map_targets(f)), Box::new(b.map_targets(f)))
            }
            LockExpr::Not(inner) => LockExpr::Not(Box::new(inner.map_targets(f))),
            LockExpr::Group(inner) => LockExpr::Group(Box::new(inner.map_targets(f))),
            LockExpr::Atom(atom) => LockExpr::Atom(atom.map_target(f)),
        }
    }
}

impl LockAtom {
    pub fn target(&self) -> Option<&LockTarget> {
        match self {
            LockAtom::Bare(t) | LockAtom::Exact(t) | LockAtom::Carry(t) | LockAtom::Owner(t) => {
                Some(t)
            }
            LockAtom::Indirect { object, .. } => Some(object),
            _ => None,
        }
    }

    fn map_target(&self, f: &impl Fn(&LockTarget) -> LockTarget) -> LockAtom {
        match self {
            LockAtom::Bare(t) => LockAtom::Bare(f(t)),
            LockAtom::Exact(t) => LockAtom::Exact(f(t)),
            LockAtom::Carry(t) => LockAtom::Carry(f(t)),
            LockAtom::Owner(t) => LockAtom::Owner(f(t)),
            LockAtom::Indirect { object, lock } => LockAtom::Indirect {
                object: f(object),
                lock: lock.clone(),
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for LockExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockExpr::Or(a, b) => write!(f, "{} | {}", a, b),
            LockExpr::And(a, b) => write!(f, "{} & {}", a, b),
            LockExpr::Not(inner) => write!(f, "!{}", inner),
            LockExpr::Group(inner) => write!(f, "({})", inner),
            LockExpr::Atom(atom) => write!(f, "{}", atom),
        }
    }
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTarget::Ref(r) => write!(f, "{}", r),
            LockTarget::Name(name) => f.write_str(name),
        }
    }
}

impl fmt::Display for LockAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockAtom::True => f.write_str("#TRUE"),
            LockAtom::False => f.write_str("#FALSE"),
            LockAtom::Bare(r) => write!(f, "{}", r),
            LockAtom::Exact(r) => write!(f, "={}", r),
            LockAtom::Carry(r) => write!(f, "+{}", r),
            LockAtom::Owner(r) => write!(f, "${}", r),
            LockAtom::Indirect { object, lock } => match lock {
                Some(lock) => write!(f, "@{}/{}", object, lock),
                None => write!(f, "@{}", object),
            },
            LockAtom::Type(v) => write!(f, "type^{}", v),
            LockAtom::Name(v) => write!(f, "name^{}", v),
            LockAtom::Flag(v) => write!(f, "flag^{}", v),
            LockAtom::Power(v) => write!(f, "power^{}", v),
            LockAtom::DbRefList(v) => write!(f, "dbreflist^{}", v),
            LockAtom::Ip(v) => write!(f, "ip^{}", v),
            LockAtom::Hostname(v) => write!(f, "hostname^{}", v),
            LockAtom::Channel(v) => write!(f, "channel^{}", v),
            LockAtom::Attribute { name, pattern } => write!(f, "{}:{}", name, pattern),
            LockAtom::Evaluation { name, value } => write!(f, "{}/{}", name, value),
        }
    }
}
