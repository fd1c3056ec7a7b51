//! Rate-limited logging for animation code.
//!
//! Exposes Rust's `log` crate to animations via a `log` table and a `print`
//! function. Animations run every tick, so output is capped: the first
//! `max` calls are forwarded, the next one emits a single "limit reached"
//! warning, everything after that is dropped until the animation is loaded
//! again.
//!
//! # Usage in Lua
//!
//! ```lua
//! log.info("started")
//! log.warn("t =", t)
//! print("same as log.info")
//! ```
//!
//! Messages are logged under the `animation` target.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use mlua::{Lua, Table, Value, Variadic};

/// Shared call counter for one loaded animation.
#[derive(Debug)]
pub(crate) struct LogBudget {
    used: Cell<usize>,
    max: usize,
}

impl LogBudget {
    pub(crate) fn new(max: usize) -> Rc<Self> {
        Rc::new(Self {
            used: Cell::new(0),
            max,
        })
    }

    /// Whether the next message may be forwarded.
    fn admit(&self) -> bool {
        let used = self.used.get();
        if used < self.max {
            self.used.set(used + 1);
            true
        } else {
            if used == self.max {
                self.used.set(used + 1);
                log::warn!(
                    target: "animation",
                    "Log limit reached (max {}), further messages are dropped",
                    self.max
                );
            }
            false
        }
    }

    #[cfg(test)]
    pub(crate) fn used(&self) -> usize {
        self.used.get()
    }
}

/// Render Lua values the way `print` would, without invoking metamethods.
fn format_args(args: &Variadic<Value>) -> String {
    args.iter()
        .map(|value| match value {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.to_string_lossy().to_string(),
            other => other.type_name().to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}

/// Register the `log` table and `print` in an animation environment.
///
/// Creates in `env`:
/// - `log.info(...)`, `log.warn(...)`, `log.error(...)`, `log.debug(...)`
/// - `print(...)` - alias for `log.info`
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub(crate) fn register(lua: &Lua, env: &Table, budget: &Rc<LogBudget>) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    let levels = [
        ("info", log::Level::Info),
        ("warn", log::Level::Warn),
        ("error", log::Level::Error),
        ("debug", log::Level::Debug),
    ];

    for (name, level) in levels {
        let budget = Rc::clone(budget);
        let func = lua
            .create_function(move |_, args: Variadic<Value>| {
                if budget.admit() {
                    log::log!(target: "animation", level, "{}", format_args(&args));
                }
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        log_table
            .set(name, func)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    let info: mlua::Function = log_table
        .get("info")
        .map_err(|e| anyhow!("Failed to read back log.info: {e}"))?;
    env.set("print", info)
        .map_err(|e| anyhow!("Failed to set print: {e}"))?;

    env.set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_table_created() {
        let lua = Lua::new();
        let env = lua.create_table().unwrap();
        register(&lua, &env, &LogBudget::new(5)).expect("Should register log sink");

        let log_table: Table = env.get("log").expect("log table should exist");
        let _: mlua::Function = log_table.get("info").expect("log.info should exist");
        let _: mlua::Function = log_table.get("warn").expect("log.warn should exist");
        let _: mlua::Function = log_table.get("error").expect("log.error should exist");
        let _: mlua::Function = log_table.get("debug").expect("log.debug should exist");
        let _: mlua::Function = env.get("print").expect("print should exist");
    }

    #[test]
    fn test_budget_caps_calls() {
        let lua = Lua::new();
        let env = lua.create_table().unwrap();
        let budget = LogBudget::new(3);
        register(&lua, &env, &budget).unwrap();

        lua.load("for i = 1, 10 do log.info('tick', i) end")
            .set_environment(env)
            .exec()
            .expect("logging should never fail");

        // 3 forwarded + 1 limit warning, rest dropped without counting
        assert_eq!(budget.used(), 4);
    }

    #[test]
    fn test_format_args() {
        let lua = Lua::new();
        let args = Variadic::from_iter([
            Value::String(lua.create_string("t").unwrap()),
            Value::Number(1.5),
            Value::Nil,
            Value::Boolean(true),
        ]);
        assert_eq!(format_args(&args), "t\t1.5\tnil\ttrue");
    }
}
