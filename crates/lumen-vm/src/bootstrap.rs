//! Two-phase bootstrap.
//!
//! Phase 0 interns the native builtins into `core`. Phase 1 evaluates the
//! embedded core library through the tree-walker — cheap to start, and
//! every fn it defines is a tree-walk closure. Phase 2 re-runs the
//! declared hot transducer fns through the compiler and VM, replacing
//! their var roots with bytecode closures: higher-order callback chains
//! then run as bytecode instead of bridging back into the tree-walker on
//! every element. The protos created in phase 2 are owned by the fn
//! values bound into the vars, so nothing from that compiler session is
//! torn down afterwards.

use lumen_analyzer::Analyzer;
use lumen_core::{Diagnostic, NodeKind, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::EnvConfig;
use crate::dispatch::Invoker;
use crate::env::Env;
use crate::reader;

/// The embedded core library. Evaluated once per `Env`, form by form, in
/// the `core` namespace.
pub const CORE_SOURCE: &str = r#"
(ns core)

(def inc (fn inc [n] (+ n 1)))
(def dec (fn dec [n] (- n 1)))
(def identity (fn identity [x] x))
(def not (fn not [x] (if x false true)))
(def nil? (fn nil? [x] (= x nil)))
(def zero? (fn zero? [n] (= n 0)))
(def pos? (fn pos? [n] (> n 0)))
(def neg? (fn neg? [n] (< n 0)))
(def empty? (fn empty? [coll] (not (seq coll))))
(def second (fn second [coll] (first (next coll))))
(def last (fn last [coll]
  (loop [s (seq coll)]
    (if (next s) (recur (next s)) (first s)))))

(defmacro defn [name params & body]
  (list 'def name (cons 'fn (cons name (cons params body)))))

(defmacro delay [& body]
  (list '__delay (cons 'fn (cons [] body))))

(defmacro when [test & body]
  (list 'if test (cons 'do body) nil))

(defmacro when-not [test & body]
  (list 'if test nil (cons 'do body)))

(defmacro if-not [test then else]
  (list 'if test else then))

(defmacro and [& forms]
  (if (empty? forms)
    true
    (if (empty? (rest forms))
      (first forms)
      (let [g (gensym)]
        (list 'let (vector g (first forms))
              (list 'if g (cons 'and (rest forms)) g))))))

(defmacro or [& forms]
  (if (empty? forms)
    nil
    (if (empty? (rest forms))
      (first forms)
      (let [g (gensym)]
        (list 'let (vector g (first forms))
              (list 'if g g (cons 'or (rest forms))))))))

(defmacro cond [& clauses]
  (if (empty? clauses)
    nil
    (list 'if (first clauses)
          (second clauses)
          (cons 'cond (rest (rest clauses))))))

(def reduce (fn reduce
  ([f coll]
    (let [s (seq coll)]
      (if s (reduce f (first s) (rest s)) (f))))
  ([f init coll]
    (loop [acc init s (seq coll)]
      (if s
        (let [acc2 (f acc (first s))]
          (if (reduced? acc2)
            (deref acc2)
            (recur acc2 (next s))))
        acc)))))

(def range (fn range
  ([end] (range 0 end))
  ([start end]
    (lazy-seq
      (if (< start end)
        (cons start (range (+ start 1) end))
        nil)))))

(def iterate (fn iterate [f x]
  (cons x (lazy-seq (iterate f (f x))))))

(def repeat (fn repeat [x]
  (cons x (lazy-seq (repeat x)))))

(def map (fn map
  ([f] (fn [rf]
         (fn ([] (rf))
             ([acc] (rf acc))
             ([acc x] (rf acc (f x))))))
  ([f coll]
    (lazy-seq
      (let [s (seq coll)]
        (if s (cons (f (first s)) (map f (rest s))) nil))))
  ([f c1 c2]
    (lazy-seq
      (let [s1 (seq c1) s2 (seq c2)]
        (if (if s1 s2 false)
          (cons (f (first s1) (first s2)) (map f (rest s1) (rest s2)))
          nil))))))

(def take (fn take [n coll]
  (lazy-seq
    (if (> n 0)
      (let [s (seq coll)]
        (if s (cons (first s) (take (- n 1) (rest s))) nil))
      nil))))

(def drop (fn drop [n coll]
  (lazy-seq
    (loop [n n s (seq coll)]
      (if (if (> n 0) s false)
        (recur (- n 1) (next s))
        s)))))

(def take-while (fn take-while [pred coll]
  (lazy-seq
    (let [s (seq coll)]
      (if s
        (if (pred (first s))
          (cons (first s) (take-while pred (rest s)))
          nil)
        nil)))))

(def drop-while (fn drop-while [pred coll]
  (lazy-seq
    (loop [s (seq coll)]
      (if (if s (pred (first s)) false)
        (recur (next s))
        s)))))

(def concat (fn concat
  ([] nil)
  ([x] x)
  ([x y]
    (lazy-seq
      (let [s (seq x)]
        (if s (cons (first s) (concat (rest s) y)) y))))
  ([x y & more] (reduce concat (concat x y) more))))

(defn mapcat [f coll] (apply concat (map f coll)))

(defn remove [pred coll] (filter (fn [x] (not (pred x))) coll))

(def comp (fn comp
  ([] identity)
  ([f] f)
  ([f g] (fn [& args] (f (apply g args))))
  ([f g & fs] (reduce comp (comp f g) fs))))

(defn transduce [xform f init coll] (reduce (xform f) init coll))

(def reductions (fn reductions
  ([f coll]
    (lazy-seq
      (let [s (seq coll)]
        (if s (reductions f (first s) (rest s)) (list (f))))))
  ([f init coll]
    (cons init
      (lazy-seq
        (let [s (seq coll)]
          (if s (reductions f (f init (first s)) (rest s)) nil)))))))

(defn doall [coll] (do (count coll) coll))
(defn dorun [coll] (do (count coll) nil))
(defn vec [coll] (apply vector coll))
(defn set [coll] (apply hash-set coll))
(defn keys [m] (map first (seq m)))
(defn vals [m] (map second (seq m)))

(defn every? [pred coll]
  (loop [s (seq coll)]
    (if s
      (if (pred (first s)) (recur (next s)) false)
      true)))

(defn some [pred coll]
  (loop [s (seq coll)]
    (if s
      (let [r (pred (first s))]
        (if r r (recur (next s))))
      nil)))

(def global-hierarchy (atom {}))

(defn derive [child parent]
  (swap! global-hierarchy
         (fn [h] (assoc h child (conj (get h child ()) parent)))))

(defn parents [tag] (get (deref global-hierarchy) tag ()))
"#;

/// Phase 0: native builtins, interned into `core`.
pub fn install_builtins(env: &mut Env) {
    for (name, value) in crate::builtins::core_builtins() {
        let var = env.namespaces.intern("core", name);
        env.namespaces.bind_root(&var, value);
        env.gc.note_infra_alloc();
    }
    debug!("builtins installed into core");
}

/// Phase 1: the whole core library through the tree-walker.
pub fn load_core(env: &mut Env) -> Result<(), Diagnostic> {
    info!("bootstrap phase 1: evaluating core library (tree-walk)");
    let forms = reader::read_all(CORE_SOURCE, "core.clj")?;
    for form in &forms {
        let node = {
            let mut invoker = Invoker {
                gc: &mut env.gc,
                dynamic: &mut env.dynamic,
            };
            let mut analyzer = Analyzer::new(&mut env.arena, &mut env.namespaces, "core.clj", &mut invoker);
            analyzer.analyze(form)?
        };
        crate::treewalk::eval_node(&env.arena, &mut env.namespaces, &mut env.gc, &mut env.dynamic, node)?;
    }
    Ok(())
}

/// Phase 2: recompile the configured hot fns through the compiler + VM,
/// rebinding the same vars to bytecode closures. Var identity is
/// untouched — `intern` hands back the phase-1 cell and only the root
/// changes.
pub fn hot_swap(env: &mut Env, config: &EnvConfig) -> Result<(), Diagnostic> {
    if config.hot_fns.is_empty() {
        return Ok(());
    }
    info!(count = config.hot_fns.len(), "bootstrap phase 2: hot-swapping transducer fns to bytecode");
    let hot: std::collections::HashSet<&str> = config.hot_fns.iter().map(|s| s.as_str()).collect();
    let prior_ns = env.namespaces.current.clone();
    let forms = reader::read_all(CORE_SOURCE, "core.clj")?;
    for form in &forms {
        let node = {
            let mut invoker = Invoker {
                gc: &mut env.gc,
                dynamic: &mut env.dynamic,
            };
            let mut analyzer = Analyzer::new(&mut env.arena, &mut env.namespaces, "core.clj", &mut invoker);
            analyzer.analyze(form)?
        };
        let is_hot_def = match &env.arena.get(node).kind {
            NodeKind::Def { name, .. } => hot.contains(&**name),
            _ => false,
        };
        if !is_hot_def {
            continue;
        }
        if let NodeKind::Def { name, .. } = &env.arena.get(node).kind {
            debug!(name = &**name, "recompiling hot fn");
        }
        let ns = Some(env.namespaces.current.clone());
        let proto = lumen_compiler::compile_toplevel(&env.arena, node, ns);
        crate::vm::run_proto(
            &env.arena,
            &mut env.namespaces,
            &mut env.gc,
            &mut env.dynamic,
            &proto,
            &HashMap::new(),
            vec![],
        )?;
    }
    env.namespaces.set_current(&prior_ns);
    Ok(())
}

/// Makes every `core` var visible from `user` and switches there. New
/// namespaces created afterwards inherit these refers from the namespace
/// current at their creation.
pub fn open_user_namespace(env: &mut Env) {
    env.namespaces.find_or_create_namespace("user");
    let core_vars: Vec<(String, lumen_core::var::VarRc)> = env
        .namespaces
        .get("core")
        .map(|ns| ns.mappings.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    for (name, var) in core_vars {
        env.namespaces.add_refer("user", &name, var);
    }
    env.namespaces.set_current("user");
}

/// A value every bootstrap phase leaves reachable, for tests that want to
/// confirm phase 2 actually swapped a root.
pub fn fn_kind(env: &Env, ns: &str, name: &str) -> Option<&'static str> {
    let var = env.namespaces.resolve(ns, name)?;
    let root = var.borrow().root.clone()?;
    match root {
        Value::Fn(gcref) => match env.gc.get(gcref) {
            lumen_core::heap::HeapObject::Fn(f) => Some(match f.body {
                lumen_core::heap::FnBody::TreeWalk(_) => "tree-walk",
                lumen_core::heap::FnBody::Bytecode(_) => "bytecode",
            }),
            _ => None,
        },
        Value::BuiltinFn(_) => Some("builtin"),
        _ => None,
    }
}
