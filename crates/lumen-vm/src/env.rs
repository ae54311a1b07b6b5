//! The `Env`: one running Lumen process. Owns the namespace table, the
//! GC, the dynamic frame stack, and the node arena; every entry point
//! (the CLI, tests, an embedding host) drives evaluation through it.

use lumen_analyzer::{form::Form, Analyzer};
use lumen_core::{error, Diagnostic, Gc, GcStats, NodeArena, Value};
use lumen_env::{DynamicFrames, NamespaceTable};
use std::collections::HashMap;
use tracing::debug;

use crate::bootstrap;
use crate::config::{Backend, EnvConfig};
use crate::dispatch::{runtime_roots, Invoker};
use crate::lazy;
use crate::reader;
use crate::{treewalk, vm};

pub struct Env {
    pub namespaces: NamespaceTable,
    pub gc: Gc,
    pub dynamic: DynamicFrames,
    pub arena: NodeArena,
    config: EnvConfig,
}

impl Env {
    pub fn new() -> Result<Env, Diagnostic> {
        Env::with_config(EnvConfig::default())
    }

    pub fn with_config(config: EnvConfig) -> Result<Env, Diagnostic> {
        let mut env = Env {
            namespaces: NamespaceTable::new("core"),
            gc: Gc::new(config.gc_threshold_bytes),
            dynamic: DynamicFrames::new(),
            arena: NodeArena::new(),
            config,
        };
        bootstrap::install_builtins(&mut env);
        bootstrap::load_core(&mut env)?;
        let config = env.config.clone();
        bootstrap::hot_swap(&mut env, &config)?;
        bootstrap::open_user_namespace(&mut env);
        debug!(backend = ?env.config.backend, "env ready");
        Ok(env)
    }

    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    /// Reads and evaluates every form in `src`, returning the last value.
    /// The failure, if any, is also parked in the thread-local error slot
    /// for hosts that lose the `Result` across a boundary.
    pub fn eval_str(&mut self, src: &str, file: &str) -> Result<Value, Diagnostic> {
        error::clear_last_error();
        let result = reader::read_all(src, file).and_then(|forms| {
            let mut result = Value::Nil;
            for form in &forms {
                result = self.eval_form(form, file)?;
            }
            Ok(result)
        });
        result.map_err(|diag| {
            error::set_last_error(diag.clone());
            diag
        })
    }

    /// Analyzes and evaluates one form on the configured backend, then
    /// offers the GC a safe point: between top-level forms every live
    /// value is reachable from the namespace tables, the dynamic frames,
    /// or the result itself.
    pub fn eval_form(&mut self, form: &Form, file: &str) -> Result<Value, Diagnostic> {
        let node = {
            let mut invoker = Invoker {
                gc: &mut self.gc,
                dynamic: &mut self.dynamic,
            };
            let mut analyzer = Analyzer::new(&mut self.arena, &mut self.namespaces, file, &mut invoker);
            analyzer.analyze(form)?
        };

        let result = match self.config.backend {
            Backend::TreeWalk => {
                treewalk::eval_node(&self.arena, &mut self.namespaces, &mut self.gc, &mut self.dynamic, node)
            }
            Backend::Vm => {
                let ns = Some(self.namespaces.current.clone());
                let proto = lumen_compiler::compile_toplevel(&self.arena, node, ns);
                vm::run_proto(
                    &self.arena,
                    &mut self.namespaces,
                    &mut self.gc,
                    &mut self.dynamic,
                    &proto,
                    &HashMap::new(),
                    vec![],
                )
            }
        }?;

        if self.gc.should_collect() {
            let mut roots = runtime_roots(&self.namespaces, &self.dynamic);
            roots.push(result.clone());
            self.gc.collect(&roots);
        }
        Ok(result)
    }

    /// Renders a value readably, realizing any lazy structure first.
    /// Collection is suppressed for the duration: the chain cells built
    /// during realization are held only by this call's stack.
    pub fn pr_value(&mut self, v: &Value) -> Result<String, Diagnostic> {
        self.gc.suppress();
        let realized = lazy::deep_realize(&self.arena, &mut self.namespaces, &mut self.gc, &mut self.dynamic, v);
        self.gc.unsuppress();
        Ok(crate::builtins::pr_str_value(&realized?))
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc.stats()
    }

    pub fn current_ns(&self) -> String {
        self.namespaces.current.to_string()
    }
}
