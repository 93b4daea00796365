//! Pinning lock references to object identities

use super::ast::LockTarget;
use super::parser::parse_lock;
use super::LockEnvironment;
use mush_core::DbRef;

/// Rewrite every bare `#N` in a lock to `#N:created` when object `N` exists.
///
/// Text that does not parse is returned unchanged. References to missing
/// objects stay bare. Already-identified references are left alone, which
/// makes normalizing a normalized lock a no-op. Object names are resolved
/// without a looker, so `me` and `here` stay as written.
pub fn normalize(text: &str, env: &dyn LockEnvironment) -> String {
    normalize_as(text, env, None)
}

/// [`normalize`], resolving object names from the point of view of `looker`.
///
/// Names that match an object become that object's `#N:created`; names that
/// match nothing stay as written.
pub fn normalize_as(text: &str, env: &dyn LockEnvironment, looker: Option<DbRef>) -> String {
    let expr = match parse_lock(text) {
        Ok(expr) => expr,
        Err(_) => return text.to_string(),
    };
    expr.map_targets(&|target: &LockTarget| match target {
        LockTarget::Ref(r) if r.is_bare() => match env.object(r.number) {
            Some(obj) => LockTarget::Ref(obj.objid()),
            None => target.clone(),
        },
        LockTarget::Ref(_) => target.clone(),
        LockTarget::Name(name) => match env.locate(name, looker) {
            Some(obj) => LockTarget::Ref(obj.objid()),
            None => target.clone(),
        },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;
    use mush_core::ObjectType;

    #[test]
    fn test_pins_existing_objects() {
        let world = MemoryWorld::new();
        let bob = world.create(ObjectType::Player, "Bob", None);
        let text = format!("={} | type^Thing", bob.dbref);
        assert_eq!(
            normalize(&text, &world),
            format!("={}:{} | type^Thing", bob.dbref, bob.created)
        );
    }

    #[test]
    fn test_leaves_missing_and_invalid_alone() {
        let world = MemoryWorld::new();
        assert_eq!(normalize("=#4242", &world), "=#4242");
        assert_eq!(normalize("(#TRUE", &world), "(#TRUE");
    }

    #[test]
    fn test_idempotent() {
        let world = MemoryWorld::new();
        let a = world.create(ObjectType::Thing, "A", None);
        let b = world.create(ObjectType::Thing, "B", None);
        let text = format!("!{} & (+{} | @{}/use)", a.dbref, b.dbref, a.dbref);
        let once = normalize(&text, &world);
        assert_eq!(normalize(&once, &world), once);
        assert!(once.contains(&a.objid().to_string()));
    }

    #[test]
    fn test_bare_dbref_becomes_objid() {
        let world = MemoryWorld::new();
        let rock = world.create(ObjectType::Thing, "Rock", None);
        assert_eq!(
            normalize(&rock.dbref.to_string(), &world),
            rock.objid().to_string()
        );
    }

    #[test]
    fn test_objid_is_unchanged() {
        let world = MemoryWorld::new();
        let rock = world.create(ObjectType::Thing, "Rock", None);
        let text = format!("={}", rock.objid());
        assert_eq!(normalize(&text, &world), text);
    }

    #[test]
    fn test_complex_lock_pins_every_dbref() {
        let world = MemoryWorld::new();
        let a = world.create(ObjectType::Thing, "A", None);
        let b = world.create(ObjectType::Thing, "B", None);
        let c = world.create(ObjectType::Thing, "C", None);
        let text = format!("({} | +{}) & !${}", a.dbref, b.dbref, c.dbref);
        assert_eq!(
            normalize(&text, &world),
            format!("({} | +{}) & !${}", a.objid(), b.objid(), c.objid())
        );
    }

    #[test]
    fn test_keyed_atoms_are_unchanged() {
        let world = MemoryWorld::new();
        world.create(ObjectType::Player, "Test", None);
        assert_eq!(normalize("flag^WIZARD", &world), "flag^WIZARD");
        assert_eq!(normalize("name^Test*", &world), "name^Test*");
        assert_eq!(normalize("SEX:m*", &world), "SEX:m*");
    }

    #[test]
    fn test_names_resolve_from_the_looker() {
        let world = MemoryWorld::new();
        let room = world.create(ObjectType::Room, "Hall", None);
        let alice = world.create(ObjectType::Player, "Alice", Some(room.dbref));
        let bob = world.create(ObjectType::Player, "Bob", Some(room.dbref));

        let looker = Some(alice.dbref);
        assert_eq!(
            normalize_as("=me", &world, looker),
            format!("={}", alice.objid())
        );
        assert_eq!(
            normalize_as("=Bob | me", &world, looker),
            format!("={} | {}", bob.objid(), alice.objid())
        );
        assert_eq!(
            normalize_as("@here/enter", &world, looker),
            format!("@{}/enter", room.objid())
        );
        assert_eq!(normalize_as("=Nobody", &world, looker), "=Nobody");
        assert_eq!(normalize("=me", &world), "=me");
    }
}
