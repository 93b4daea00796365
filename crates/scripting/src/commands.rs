//! Built-in commands
//!
//! The small command set the shell and tests need. Each body receives its
//! arguments already split and evaluated according to its definition.

use crate::attributes::AttributePath;
use crate::dispatch::CommandCall;
use crate::error::Abort;
use crate::locate::{locate, split_object_attribute};
use crate::lock::LockType;
use crate::registry::{ArgMode, CommandDefinition, CommandRegistry, FunctionBody, FunctionDefinition, ParseMode};
use crate::services::{Capability, Notification};
use futures::future::BoxFuture;
use mush_core::{DbRef, MString};

type Done<'a> = BoxFuture<'a, Result<(), Abort>>;

const CANT_SEE: &str = "I can't see that here.";
const PERMISSION_DENIED: &str = "Permission denied.";
const LOCK_SWITCHES: &[&str] = &[
    "basic", "enter", "use", "command", "listen", "page", "speech", "zone", "teleport",
];

/// Registry holding every builtin command
pub fn standard_commands() -> CommandRegistry {
    let registry = CommandRegistry::new();
    registry.register(CommandDefinition::new("think", ArgMode::Single, command_think));
    registry.register(CommandDefinition::new("@pemit", ArgMode::EqSplit, command_pemit));
    registry.register(CommandDefinition::new("@emit", ArgMode::Single, command_emit));
    registry.register(
        CommandDefinition::new("&", ArgMode::EqSplit, command_set_attribute)
            .parse_modes(ParseMode::Evaluate, ParseMode::NoParse)
            .single_token('&'),
    );
    registry.register(
        CommandDefinition::new("@lock", ArgMode::EqSplit, command_lock)
            .parse_modes(ParseMode::Evaluate, ParseMode::NoParse)
            .switches(LOCK_SWITCHES),
    );
    registry.register(
        CommandDefinition::new("@unlock", ArgMode::Single, command_unlock).switches(LOCK_SWITCHES),
    );
    registry.register(CommandDefinition::new("@wipe", ArgMode::Single, command_wipe));
    registry.register(
        CommandDefinition::new("@function", ArgMode::EqSplit, command_function)
            .switches(&["delete"])
            .requires(Capability::Wizard),
    );
    registry
}

/// Locate `name`, telling the executor when nothing matches
async fn target(call: &CommandCall<'_>, name: &str) -> Result<Option<DbRef>, Abort> {
    let found = locate(call.ctx, call.stack, name).await?;
    if found.is_none() {
        call.reply(CANT_SEE).await?;
    }
    Ok(found)
}

/// Like [`target`], also requiring control of the object
async fn controlled(call: &CommandCall<'_>, name: &str) -> Result<Option<DbRef>, Abort> {
    let Some(object) = target(call, name).await? else {
        return Ok(None);
    };
    let controls = call
        .ctx
        .guard(call.ctx.services().permissions.controls(call.executor(), object))
        .await?;
    if !controls {
        call.reply(PERMISSION_DENIED).await?;
        return Ok(None);
    }
    Ok(Some(object))
}

fn lock_type(call: &CommandCall<'_>) -> LockType {
    call.switches
        .first()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LockType::Basic)
}

/// `think <text>`
fn command_think(call: CommandCall<'_>) -> Done<'_> {
    Box::pin(async move { call.reply(call.args.left.clone()).await })
}

/// `@pemit <target>=<message>`
fn command_pemit(call: CommandCall<'_>) -> Done<'_> {
    Box::pin(async move {
        let Some(recipient) = target(&call, call.args.left.plain()).await? else {
            return Ok(());
        };
        let me = call.executor();
        call.ctx
            .guard(call.ctx.services().notifier.notify(recipient, me, call.args.right()))
            .await
    })
}

/// `@emit <message>` to everything in the executor's location
fn command_emit(call: CommandCall<'_>) -> Done<'_> {
    Box::pin(async move {
        let me = call.executor();
        let services = call.ctx.services();
        let Some(location) = call.ctx.guard(services.objects.object(me)).await?.and_then(|o| o.location) else {
            return call.reply(call.args.left.clone()).await;
        };
        let batch = call
            .ctx
            .guard(services.objects.contents(location))
            .await?
            .into_iter()
            .map(|target| Notification {
                target,
                sender: me,
                message: call.args.left.clone(),
            })
            .collect();
        call.ctx.guard(services.notifier.notify_batch(batch)).await
    })
}

/// `&<attribute> <object>=<value>`; an empty value clears the attribute
fn command_set_attribute(call: CommandCall<'_>) -> Done<'_> {
    Box::pin(async move {
        let left = call.args.left.plain().trim().to_string();
        let (name, object) = left
            .split_once(char::is_whitespace)
            .map_or((left.as_str(), "me"), |(name, object)| (name, object.trim()));
        let Ok(path) = name.parse::<AttributePath>() else {
            return call.reply("That's not a good name for an attribute.").await;
        };
        let Some(object) = controlled(&call, object).await? else {
            return Ok(());
        };

        let attributes = &call.ctx.services().attributes;
        let value = call.args.right();
        let result = if value.is_empty() {
            call.ctx
                .guard(attributes.clear_attribute(object, &path))
                .await?
                .map(|_| "Cleared.")
        } else {
            call.ctx
                .guard(attributes.set_attribute(object, &path, value, call.executor()))
                .await?
                .map(|_| "Set.")
        };
        match result {
            Ok(message) => call.reply(format!("{} - {}", path, message)).await,
            Err(e) => {
                tracing::debug!("Attribute change on {} failed: {}", object, e);
                call.reply(format!("#-1 {}", e)).await
            }
        }
    })
}

/// `@lock[/<type>] <object>=<key>`
fn command_lock(call: CommandCall<'_>) -> Done<'_> {
    Box::pin(async move {
        let Some(object) = controlled(&call, call.args.left.plain()).await? else {
            return Ok(());
        };
        let lock = lock_type(&call);
        let key = call.args.right();
        if !call.args.has_equals || key.plain().trim().is_empty() {
            call.ctx.engine().locks().clear(object, lock);
            return call.reply("Unlocked.").await;
        }
        match call
            .ctx
            .engine()
            .locks()
            .set_as(object, lock, key.plain(), call.executor()) {
            Ok(_) => call.reply("Locked.").await,
            Err(e) => {
                tracing::debug!("Rejected {} lock on {}: {}", lock, object, e);
                call.reply("I don't understand that key.").await
            }
        }
    })
}

/// `@unlock[/<type>] <object>`
fn command_unlock(call: CommandCall<'_>) -> Done<'_> {
    Box::pin(async move {
        let Some(object) = controlled(&call, call.args.left.plain()).await? else {
            return Ok(());
        };
        call.ctx.engine().locks().clear(object, lock_type(&call));
        call.reply("Unlocked.").await
    })
}

/// `@wipe <object>[/<pattern>]`
fn command_wipe(call: CommandCall<'_>) -> Done<'_> {
    Box::pin(async move {
        let text = call.args.left.plain().trim().to_string();
        let (object, pattern) = match split_object_attribute(&text) {
            (Some(object), pattern) => (object, pattern),
            (None, object) => (object, "*"),
        };
        let Some(object) = controlled(&call, object).await? else {
            return Ok(());
        };
        let wiped = call
            .ctx
            .guard(call.ctx.services().attributes.wipe_attributes(object, pattern))
            .await?;
        match wiped {
            Ok(0) => call.reply("No matching attributes.").await,
            Ok(n) => call.reply(format!("{} attributes wiped.", n)).await,
            Err(e) => call.reply(format!("#-1 {}", e)).await,
        }
    })
}

/// `@function <name>=<object>/<attribute>`, `@function/delete <name>`
fn command_function(call: CommandCall<'_>) -> Done<'_> {
    Box::pin(async move {
        let functions = &call.ctx.services().functions;
        let name = call.args.left.plain().trim().to_ascii_lowercase();

        if name.is_empty() {
            let mut names = functions.names();
            names.sort();
            return call.reply(names.join(" ")).await;
        }
        let existing = functions.get(&name);
        let builtin = existing
            .as_ref()
            .is_some_and(|d| !matches!(d.body, FunctionBody::User { .. }));

        if call.has_switch("delete") {
            if builtin || existing.is_none() {
                return call.reply("No such user function.").await;
            }
            functions.remove(&name);
            return call.reply(format!("Function {} deleted.", name.to_ascii_uppercase())).await;
        }
        if builtin {
            return call.reply(format!("Function {} is built in.", name.to_ascii_uppercase())).await;
        }

        let right = call.args.right();
        let (Some(object), attribute) = split_object_attribute(right.plain().trim()) else {
            return call.reply("Usage: @function name=object/attribute").await;
        };
        if attribute.parse::<AttributePath>().is_err() {
            return call.reply("That's not a good name for an attribute.").await;
        }
        let Some(object) = target(&call, object).await? else {
            return Ok(());
        };
        functions.register(FunctionDefinition::user(&name, object, attribute));
        tracing::debug!("User function {} bound to {}/{}", name, object, attribute);
        call.reply(format!("Function {} defined.", name.to_ascii_uppercase())).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::standard_functions;
    use crate::context::Services;
    use crate::eval::Engine;
    use crate::frame::Frame;
    use crate::memory::MemoryWorld;
    use mush_config::{ConfigHandle, EngineConfig};
    use mush_core::ObjectType;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Shell {
        world: Arc<MemoryWorld>,
        engine: Engine,
        room: DbRef,
        wizard: DbRef,
    }

    impl Shell {
        fn new() -> Self {
            let world = Arc::new(MemoryWorld::new());
            let (room, wizard) = world.bootstrap();
            let services = Services::from_world(
                world.clone(),
                Arc::new(standard_functions()),
                Arc::new(standard_commands()),
            );
            let engine = Engine::new(services, ConfigHandle::new(EngineConfig::default()));
            Self {
                world,
                engine,
                room,
                wizard,
            }
        }

        /// Run as `who` and return the messages sent to `who`
        async fn run_as(&self, who: DbRef, text: &str) -> Vec<String> {
            self.engine
                .command_list_parse(text, Frame::new(who, who, who), &CancellationToken::new())
                .await
                .unwrap();
            self.world
                .take_notifications()
                .into_iter()
                .filter(|n| n.target == who)
                .map(|n| n.message.into_plain())
                .collect()
        }

        async fn run(&self, text: &str) -> Vec<String> {
            self.run_as(self.wizard, text).await
        }
    }

    #[tokio::test]
    async fn test_set_and_clear_attribute() {
        let shell = Shell::new();
        assert_eq!(shell.run("&note me=hello").await, vec!["NOTE - Set."]);
        assert_eq!(shell.world.attr_value(shell.wizard, "NOTE").as_deref(), Some("hello"));
        assert_eq!(shell.run("&note me=").await, vec!["NOTE - Cleared."]);
        assert!(shell.world.attr_value(shell.wizard, "NOTE").is_none());
        assert_eq!(
            shell.run("&a``b me=x").await,
            vec!["That's not a good name for an attribute."]
        );
    }

    #[tokio::test]
    async fn test_mortals_cannot_touch_others() {
        let shell = Shell::new();
        let bob = shell.world.create(ObjectType::Player, "Bob", Some(shell.room)).dbref;
        assert_eq!(shell.run_as(bob, "&x *wizard=1").await, vec![PERMISSION_DENIED]);
        assert_eq!(shell.run_as(bob, "@wipe #1").await, vec![PERMISSION_DENIED]);
        assert_eq!(shell.run_as(bob, "@function foo=me/foo").await, vec![PERMISSION_DENIED]);
        assert_eq!(shell.run_as(bob, "@pemit nobody=hi").await, vec![CANT_SEE]);
    }

    #[tokio::test]
    async fn test_wipe() {
        let shell = Shell::new();
        let wizard = shell.wizard;
        shell.world.set_attr(wizard, "A`B", "1");
        shell.world.set_attr(wizard, "C", "2");
        assert_eq!(shell.run("@wipe me/a").await, vec!["2 attributes wiped."]);
        assert_eq!(shell.run("@wipe me").await, vec!["1 attributes wiped."]);
        assert_eq!(shell.run("@wipe me").await, vec!["No matching attributes."]);
    }

    #[tokio::test]
    async fn test_user_function() {
        let shell = Shell::new();
        shell.world.set_attr(shell.wizard, "DOUBLE", "[mul(%0,2)]");
        assert_eq!(
            shell.run("@function double=me/double").await,
            vec!["Function DOUBLE defined."]
        );
        assert_eq!(shell.run("think double(21)").await, vec!["42"]);
        assert_eq!(shell.run("@function add=me/double").await, vec!["Function ADD is built in."]);
        assert_eq!(
            shell.run("@function/delete double").await,
            vec!["Function DOUBLE deleted."]
        );
        assert_eq!(
            shell.run("think double(1)").await,
            vec!["#-1 FUNCTION (DOUBLE) NOT FOUND"]
        );
    }

    #[tokio::test]
    async fn test_lock_without_key_unlocks() {
        let shell = Shell::new();
        let box_ = shell.world.create(ObjectType::Thing, "Box", Some(shell.room)).dbref;
        assert_eq!(shell.run("@lock box=#FALSE").await, vec!["Locked."]);
        assert!(shell.world.lock_text(box_, LockType::Basic).is_some());
        assert_eq!(shell.run("@lock box").await, vec!["Unlocked."]);
        assert!(shell.world.lock_text(box_, LockType::Basic).is_none());
    }

    #[tokio::test]
    async fn test_lock_names_resolve_for_the_executor() {
        let shell = Shell::new();
        let box_ = shell.world.create(ObjectType::Thing, "Box", Some(shell.room)).dbref;
        let wizard = shell.world.get(shell.wizard).unwrap();
        assert_eq!(shell.run("@lock box==me").await, vec!["Locked."]);
        assert_eq!(
            shell.world.lock_text(box_, LockType::Basic),
            Some(format!("={}", wizard.objid()))
        );
        assert_eq!(
            shell.run("@lock/use box=+Nothing Here").await,
            vec!["I don't understand that key."]
        );
        assert!(shell.world.lock_text(box_, LockType::Use).is_none());
    }
}
