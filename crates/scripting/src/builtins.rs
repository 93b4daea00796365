//! Built-in softcode functions
//!
//! Everything here is registered explicitly by [`standard_functions`].

use crate::attributes::{AttributePath, WildcardStyle};
use crate::error::Abort;
use crate::eval::{FunctionCall, NO_SUCH_ATTRIBUTE, NO_SUCH_OBJECT, PERMISSION_DENIED};
use crate::frame::IterationRegister;
use crate::lock::LockType;
use crate::locate::{locate, split_object_attribute};
use crate::registry::{FunctionDefinition, FunctionRegistry};
use futures::future::BoxFuture;
use mush_core::{DbRef, MString};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

type Output<'a> = BoxFuture<'a, Result<MString, Abort>>;

/// Registry holding every builtin
pub fn standard_functions() -> FunctionRegistry {
    let registry = FunctionRegistry::new();
    register_math_functions(&registry);
    register_string_functions(&registry);
    register_logic_functions(&registry);
    register_register_functions(&registry);
    register_control_functions(&registry);
    register_object_functions(&registry);
    registry
}

fn register_math_functions(registry: &FunctionRegistry) {
    registry.register(FunctionDefinition::native("add", 2, None, builtin_add));
    registry.register(FunctionDefinition::native("sub", 2, Some(2), builtin_sub));
    registry.register(FunctionDefinition::native("mul", 2, None, builtin_mul));
    registry.register(FunctionDefinition::native("div", 2, Some(2), builtin_div));
    registry.register(FunctionDefinition::native("mod", 2, Some(2), builtin_mod));
    registry.register(FunctionDefinition::native("abs", 1, Some(1), builtin_abs));
}

fn register_string_functions(registry: &FunctionRegistry) {
    registry.register(FunctionDefinition::native("strcat", 0, None, builtin_strcat));
    registry.register(FunctionDefinition::native("cat", 0, None, builtin_cat));
    registry.register(FunctionDefinition::native("strlen", 0, Some(1), builtin_strlen));
    registry.register(FunctionDefinition::engine("lit", 0, None, builtin_lit).no_parse());
    registry.register(FunctionDefinition::native("ucstr", 1, Some(1), builtin_ucstr));
    registry.register(FunctionDefinition::native("lcstr", 1, Some(1), builtin_lcstr));
    registry.register(FunctionDefinition::native("words", 0, Some(2), builtin_words));
    registry.register(FunctionDefinition::native("first", 0, Some(2), builtin_first));
    registry.register(FunctionDefinition::native("rest", 0, Some(2), builtin_rest));
}

fn register_logic_functions(registry: &FunctionRegistry) {
    registry.register(FunctionDefinition::native("eq", 2, Some(2), builtin_eq));
    registry.register(FunctionDefinition::native("neq", 2, Some(2), builtin_neq));
    registry.register(FunctionDefinition::native("lt", 2, Some(2), builtin_lt));
    registry.register(FunctionDefinition::native("lte", 2, Some(2), builtin_lte));
    registry.register(FunctionDefinition::native("gt", 2, Some(2), builtin_gt));
    registry.register(FunctionDefinition::native("gte", 2, Some(2), builtin_gte));
    registry.register(FunctionDefinition::native("not", 0, Some(1), builtin_not));
    registry.register(FunctionDefinition::native("t", 0, Some(1), builtin_t));
    registry.register(FunctionDefinition::native("and", 1, None, builtin_and));
    registry.register(FunctionDefinition::native("or", 1, None, builtin_or));
}

fn register_register_functions(registry: &FunctionRegistry) {
    registry.register(FunctionDefinition::engine("setq", 2, None, builtin_setq));
    registry.register(FunctionDefinition::engine("setr", 2, Some(2), builtin_setr));
    registry.register(FunctionDefinition::engine("r", 1, Some(1), builtin_r));
    registry.register(FunctionDefinition::engine("u", 1, Some(11), builtin_u));
    registry.register(FunctionDefinition::engine("ulocal", 1, Some(11), builtin_ulocal));
}

fn register_control_functions(registry: &FunctionRegistry) {
    registry.register(FunctionDefinition::engine("if", 2, Some(3), builtin_if).no_parse());
    registry.register(FunctionDefinition::engine("ifelse", 3, Some(3), builtin_if).no_parse());
    registry.register(FunctionDefinition::engine("switch", 2, None, builtin_switch).no_parse());
    registry.register(FunctionDefinition::engine("iter", 2, Some(4), builtin_iter).no_parse());
    registry.register(FunctionDefinition::engine("itext", 1, Some(1), builtin_itext));
    registry.register(FunctionDefinition::engine("inum", 1, Some(1), builtin_inum));
    registry.register(FunctionDefinition::engine("ibreak", 0, Some(1), builtin_ibreak));
}

fn register_object_functions(registry: &FunctionRegistry) {
    registry.register(FunctionDefinition::engine("v", 1, Some(1), builtin_v));
    registry.register(FunctionDefinition::engine("get", 1, Some(1), builtin_get));
    registry.register(FunctionDefinition::engine("name", 1, Some(1), builtin_name));
    registry.register(FunctionDefinition::engine("num", 1, Some(1), builtin_num));
    registry.register(FunctionDefinition::engine("loc", 1, Some(1), builtin_loc));
    registry.register(FunctionDefinition::engine("owner", 1, Some(1), builtin_owner));
    registry.register(FunctionDefinition::engine("elock", 2, Some(2), builtin_elock));
}

// ---- helpers ----

const NOT_NUMBERS: &str = "#-1 ARGUMENTS MUST BE NUMBERS";

fn parse_number(value: &MString) -> Option<f64> {
    let text = value.plain().trim();
    if text.is_empty() {
        return Some(0.0);
    }
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn numbers(args: &[MString]) -> Option<Vec<f64>> {
    args.iter().map(parse_number).collect()
}

fn format_number(n: f64) -> MString {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        MString::from(format!("{}", n as i64))
    } else {
        MString::from(format!("{}", n))
    }
}

fn boolean(value: bool) -> MString {
    MString::from(if value { "1" } else { "0" })
}

/// Softcode truthiness: empty, zero and `#-` error values are false
fn is_true(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || value.starts_with("#-") {
        return false;
    }
    match value.parse::<f64>() {
        Ok(n) => n != 0.0,
        Err(_) => true,
    }
}

fn delimiter(args: &[MString], index: usize) -> Option<char> {
    args.get(index).and_then(|d| d.plain().chars().next())
}

/// Split a list on `delim`, or on runs of whitespace by default
fn split_list(list: &MString, delim: Option<char>) -> Vec<MString> {
    match delim {
        Some(d) if d != ' ' => list.split(d),
        _ => list
            .trim()
            .split(' ')
            .into_iter()
            .filter(|word| !word.is_empty())
            .collect(),
    }
}

fn compare(args: &[MString], op: fn(f64, f64) -> bool) -> MString {
    match numbers(args) {
        Some(n) => boolean(op(n[0], n[1])),
        None => MString::from(NOT_NUMBERS),
    }
}

// ---- math ----

fn builtin_add(args: &[MString]) -> MString {
    numbers(args).map_or_else(|| MString::from(NOT_NUMBERS), |n| format_number(n.iter().sum()))
}

fn builtin_sub(args: &[MString]) -> MString {
    numbers(args).map_or_else(|| MString::from(NOT_NUMBERS), |n| format_number(n[0] - n[1]))
}

fn builtin_mul(args: &[MString]) -> MString {
    numbers(args).map_or_else(|| MString::from(NOT_NUMBERS), |n| format_number(n.iter().product()))
}

fn integers(args: &[MString]) -> Option<(i64, i64)> {
    let parse = |v: &MString| v.plain().trim().parse::<i64>().ok();
    Some((parse(&args[0])?, parse(&args[1])?))
}

fn builtin_div(args: &[MString]) -> MString {
    match integers(args) {
        Some((_, 0)) => MString::from("#-1 DIVISION BY ZERO"),
        Some((a, b)) => MString::from(a.wrapping_div(b).to_string()),
        None => MString::from("#-1 ARGUMENTS MUST BE INTEGERS"),
    }
}

fn builtin_mod(args: &[MString]) -> MString {
    match integers(args) {
        Some((_, 0)) => MString::from("#-1 DIVISION BY ZERO"),
        Some((a, b)) => MString::from(a.wrapping_rem(b).to_string()),
        None => MString::from("#-1 ARGUMENTS MUST BE INTEGERS"),
    }
}

fn builtin_abs(args: &[MString]) -> MString {
    parse_number(&args[0]).map_or_else(|| MString::from(NOT_NUMBERS), |n| format_number(n.abs()))
}

// ---- strings ----

fn builtin_strcat(args: &[MString]) -> MString {
    let mut out = MString::new();
    for arg in args {
        out.push(arg);
    }
    out
}

fn builtin_cat(args: &[MString]) -> MString {
    MString::join(args, &MString::from(" "))
}

fn builtin_strlen(args: &[MString]) -> MString {
    MString::from(args.first().map_or(0, |s| s.len()).to_string())
}

fn builtin_lit(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let raw: Vec<MString> = (0..call.arg_count()).map(|i| call.raw(i)).collect();
        Ok(MString::join(&raw, &MString::from(",")))
    })
}

fn builtin_ucstr(args: &[MString]) -> MString {
    args[0].to_ascii_uppercase()
}

fn builtin_lcstr(args: &[MString]) -> MString {
    args[0].to_ascii_lowercase()
}

fn builtin_words(args: &[MString]) -> MString {
    let count = args
        .first()
        .map_or(0, |list| split_list(list, delimiter(args, 1)).len());
    MString::from(count.to_string())
}

fn builtin_first(args: &[MString]) -> MString {
    args.first()
        .and_then(|list| split_list(list, delimiter(args, 1)).into_iter().next())
        .unwrap_or_default()
}

fn builtin_rest(args: &[MString]) -> MString {
    let Some(list) = args.first() else {
        return MString::new();
    };
    let delim = delimiter(args, 1);
    let words = split_list(list, delim);
    let separator = MString::from(delim.unwrap_or(' ').to_string());
    MString::join(words.iter().skip(1), &separator)
}

// ---- logic ----

fn builtin_eq(args: &[MString]) -> MString {
    compare(args, |a, b| a == b)
}

fn builtin_neq(args: &[MString]) -> MString {
    compare(args, |a, b| a != b)
}

fn builtin_lt(args: &[MString]) -> MString {
    compare(args, |a, b| a < b)
}

fn builtin_lte(args: &[MString]) -> MString {
    compare(args, |a, b| a <= b)
}

fn builtin_gt(args: &[MString]) -> MString {
    compare(args, |a, b| a > b)
}

fn builtin_gte(args: &[MString]) -> MString {
    compare(args, |a, b| a >= b)
}

fn builtin_not(args: &[MString]) -> MString {
    boolean(!args.first().is_some_and(|v| is_true(v.plain())))
}

fn builtin_t(args: &[MString]) -> MString {
    boolean(args.first().is_some_and(|v| is_true(v.plain())))
}

fn builtin_and(args: &[MString]) -> MString {
    boolean(args.iter().all(|v| is_true(v.plain())))
}

fn builtin_or(args: &[MString]) -> MString {
    boolean(args.iter().any(|v| is_true(v.plain())))
}

// ---- registers and user functions ----

fn builtin_setq(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        if call.values.len() % 2 != 0 {
            return Ok(MString::from(
                "#-1 FUNCTION (SETQ) EXPECTS AN EVEN NUMBER OF ARGUMENTS",
            ));
        }
        for pair in call.values.chunks(2) {
            call.frame().registers.set(pair[0].plain().trim(), pair[1].clone());
        }
        Ok(MString::new())
    })
}

fn builtin_setr(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let value = call.arg(1);
        call.frame().registers.set(call.arg(0).plain().trim(), value.clone());
        Ok(value)
    })
}

fn builtin_r(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        Ok(call
            .frame()
            .registers
            .get(call.arg(0).plain().trim())
            .unwrap_or_default())
    })
}

fn builtin_u(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(call_user(call, false))
}

fn builtin_ulocal(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(call_user(call, true))
}

async fn call_user(call: FunctionCall<'_>, local: bool) -> Result<MString, Abort> {
    let target = call.arg(0);
    let (object, attribute) = split_object_attribute(target.plain());
    let object = match object {
        Some(name) => match locate(call.ctx, call.stack, name).await? {
            Some(dbref) => dbref,
            None => return Ok(MString::from(NO_SUCH_OBJECT)),
        },
        None => call.frame().executor,
    };
    let Ok(path) = attribute.parse::<AttributePath>() else {
        return Ok(MString::from(NO_SUCH_ATTRIBUTE));
    };
    let args = call.values.iter().skip(1).cloned().collect();
    call.ctx
        .call_attribute(object, &path, args, call.stack, local)
        .await
}

// ---- control flow ----

/// `if(cond, then[, else])` and `ifelse(cond, then, else)`
fn builtin_if(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let condition = call.evaluate(0).await?;
        if is_true(condition.plain()) {
            call.evaluate(1).await
        } else {
            call.evaluate(2).await
        }
    })
}

/// `switch(value, pattern1, result1, ..., [default])` with wildcard patterns
fn builtin_switch(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let value = call.evaluate(0).await?;
        let count = call.arg_count();
        let mut index = 1;
        while index + 1 < count {
            let pattern = call.evaluate(index).await?;
            let capacity = call.ctx.engine().config().snapshot().pattern_cache_capacity;
            let matcher = call.ctx.engine().resolver().patterns().wildcard(
                pattern.plain(),
                WildcardStyle::Plain,
                false,
                capacity,
            );
            if matcher.is_some_and(|re| re.is_match(value.plain())) {
                return call.evaluate(index + 1).await;
            }
            index += 2;
        }
        if index < count {
            return call.evaluate(index).await;
        }
        Ok(MString::new())
    })
}

/// `iter(list, pattern[, delim[, separator]])`
fn builtin_iter(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let list = call.evaluate(0).await?;
        let delim = call.evaluate(2).await?.plain().chars().next();
        let separator = if call.arg_count() > 3 {
            call.evaluate(3).await?
        } else {
            MString::from(delim.unwrap_or(' ').to_string())
        };

        let halted = Arc::new(AtomicBool::new(false));
        let mut results = Vec::new();
        for (i, item) in split_list(&list, delim).into_iter().enumerate() {
            let register = IterationRegister::new(item, i + 1, Arc::clone(&halted));
            let stack = call.stack.push(call.frame().with_iteration(register));
            results.push(call.evaluate_in(1, &stack).await?);
            if halted.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
        }
        Ok(MString::join(&results, &separator))
    })
}

fn iteration_level(call: &FunctionCall<'_>) -> usize {
    call.values
        .first()
        .and_then(|v| v.plain().trim().parse().ok())
        .unwrap_or(0)
}

fn builtin_itext(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let level = iteration_level(&call);
        Ok(match call.frame().iteration_register(level) {
            Some(register) => register.value.clone(),
            None => MString::from("#-1 ARGUMENT OUT OF RANGE"),
        })
    })
}

fn builtin_inum(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let level = iteration_level(&call);
        Ok(match call.frame().iteration_register(level) {
            Some(register) => MString::from(register.index.to_string()),
            None => MString::from("#-1 ARGUMENT OUT OF RANGE"),
        })
    })
}

fn builtin_ibreak(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let level = iteration_level(&call);
        Ok(match call.frame().iteration_register(level) {
            Some(register) => {
                register.halt();
                MString::new()
            }
            None => MString::from("#-1 ARGUMENT OUT OF RANGE"),
        })
    })
}

// ---- objects ----

async fn locate_arg(call: &FunctionCall<'_>, index: usize) -> Result<Option<DbRef>, Abort> {
    locate(call.ctx, call.stack, call.arg(index).plain()).await
}

fn builtin_v(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let Ok(path) = call.arg(0).plain().parse::<AttributePath>() else {
            return Ok(MString::new());
        };
        let executor = call.frame().executor;
        let resolution = call
            .ctx
            .guard(call.ctx.engine().resolver().resolve(executor, &path, true))
            .await?;
        Ok(resolution.found().map(|f| f.value()).unwrap_or_default())
    })
}

fn builtin_get(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let target = call.arg(0);
        let (object, attribute) = split_object_attribute(target.plain());
        let Some(object) = locate(call.ctx, call.stack, object.unwrap_or("me")).await? else {
            return Ok(MString::from(NO_SUCH_OBJECT));
        };
        let Ok(path) = attribute.parse::<AttributePath>() else {
            return Ok(MString::from(NO_SUCH_ATTRIBUTE));
        };
        let resolution = call
            .ctx
            .guard(call.ctx.engine().resolver().resolve(object, &path, true))
            .await?;
        let Some(found) = resolution.found() else {
            return Ok(MString::from(NO_SUCH_ATTRIBUTE));
        };
        let visual = found.attribute().is_some_and(|a| a.flags.visual);
        let executor = call.frame().executor;
        if !visual
            && !call
                .ctx
                .guard(call.ctx.services().permissions.can_examine(executor, object))
                .await?
        {
            return Ok(MString::from(PERMISSION_DENIED));
        }
        Ok(found.value())
    })
}

fn builtin_name(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let Some(dbref) = locate_arg(&call, 0).await? else {
            return Ok(MString::from(NO_SUCH_OBJECT));
        };
        let object = call.ctx.guard(call.ctx.services().objects.object(dbref)).await?;
        Ok(object.map(|o| MString::from(o.name)).unwrap_or_default())
    })
}

fn builtin_num(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let dbref = locate_arg(&call, 0).await?.unwrap_or(DbRef::NOTHING);
        Ok(MString::from(dbref.to_string()))
    })
}

fn builtin_loc(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let Some(dbref) = locate_arg(&call, 0).await? else {
            return Ok(MString::from(NO_SUCH_OBJECT));
        };
        let object = call.ctx.guard(call.ctx.services().objects.object(dbref)).await?;
        let location = object.and_then(|o| o.location).unwrap_or(DbRef::NOTHING);
        Ok(MString::from(location.to_string()))
    })
}

fn builtin_owner(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let Some(dbref) = locate_arg(&call, 0).await? else {
            return Ok(MString::from(NO_SUCH_OBJECT));
        };
        let object = call.ctx.guard(call.ctx.services().objects.object(dbref)).await?;
        let owner = object.map(|o| o.owner).unwrap_or(DbRef::NOTHING);
        Ok(MString::from(owner.to_string()))
    })
}

/// `elock(object[/locktype], victim)`
fn builtin_elock(call: FunctionCall<'_>) -> Output<'_> {
    Box::pin(async move {
        let target = call.arg(0);
        let (object, lock) = match target.plain().split_once('/') {
            Some((object, lock)) => (object.to_string(), lock.parse::<LockType>().ok()),
            None => (target.plain().to_string(), Some(LockType::Basic)),
        };
        let Some(lock) = lock else {
            return Ok(MString::from("#-1 NO SUCH LOCK TYPE"));
        };
        let (Some(gated), Some(victim)) = (
            locate(call.ctx, call.stack, &object).await?,
            locate_arg(&call, 1).await?,
        ) else {
            return Ok(MString::from(NO_SUCH_OBJECT));
        };
        let passes = call
            .ctx
            .engine()
            .locks()
            .evaluate_ref(lock, gated, victim);
        Ok(boolean(passes))
    })
}
