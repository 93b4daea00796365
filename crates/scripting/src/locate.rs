//! Object name matching

use crate::error::Abort;
use crate::eval::EvalContext;
use crate::frame::FrameStack;
use mush_core::{DbRef, ObjectRef};

/// Find an object the way a player names it: `me`, `here`, `#N`,
/// `#N:T`, `*player`, or the name of something nearby.
pub async fn locate(ctx: &EvalContext, stack: &FrameStack, name: &str) -> Result<Option<DbRef>, Abort> {
    let name = name.trim();
    let executor = stack.top().executor;
    let objects = &ctx.services().objects;

    if name.eq_ignore_ascii_case("me") {
        return Ok(Some(executor));
    }
    let location = ctx.guard(objects.object(executor)).await?.and_then(|o| o.location);
    if name.eq_ignore_ascii_case("here") {
        return Ok(location);
    }
    if name.starts_with('#') {
        let Ok(reference) = name.parse::<ObjectRef>() else {
            return Ok(None);
        };
        let object = ctx.guard(objects.object(reference.number)).await?;
        return Ok(object.filter(|o| reference.matches(o)).map(|o| o.dbref));
    }
    if let Some(player) = name.strip_prefix('*') {
        return ctx.guard(objects.find_player(player)).await;
    }

    let mut nearby = ctx.guard(objects.contents(executor)).await?;
    if let Some(location) = location {
        nearby.extend(ctx.guard(objects.contents(location)).await?);
    }
    for candidate in nearby {
        if let Some(object) = ctx.guard(objects.object(candidate)).await? {
            if object.name.eq_ignore_ascii_case(name) {
                return Ok(Some(object.dbref));
            }
        }
    }
    Ok(None)
}

/// Split `obj/attr`. Without a slash the whole text is the attribute.
pub fn split_object_attribute(text: &str) -> (Option<&str>, &str) {
    match text.split_once('/') {
        Some((object, attribute)) => (Some(object), attribute),
        None => (None, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_object_attribute() {
        assert_eq!(split_object_attribute("me/foo"), (Some("me"), "foo"));
        assert_eq!(split_object_attribute("foo"), (None, "foo"));
        assert_eq!(split_object_attribute("#3/a`b"), (Some("#3"), "a`b"));
    }
}
