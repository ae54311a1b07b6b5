//! End-to-end evaluation scenarios driven through `Env::eval_str`, on
//! both backends where the behavior must agree.

use lumen_core::{ErrorKind, Value};
use lumen_vm::{Backend, Env, EnvConfig};

fn tree_walk_env() -> Env {
    Env::new().expect("bootstrap")
}

fn vm_env() -> Env {
    let config = EnvConfig {
        backend: Backend::Vm,
        ..EnvConfig::default()
    };
    Env::with_config(config).expect("bootstrap")
}

fn eval_to_string(env: &mut Env, src: &str) -> String {
    let v = env.eval_str(src, "test.clj").expect("eval");
    env.pr_value(&v).expect("print")
}

#[test]
fn arithmetic_and_overflow_promotion() {
    for mut env in [tree_walk_env(), vm_env()] {
        assert_eq!(eval_to_string(&mut env, "(+ 1 2)"), "3");
        // i64 overflow promotes to float.
        let v = env.eval_str("(* 9223372036854775000 2)", "test.clj").unwrap();
        assert!(matches!(v, Value::Float(f) if f == 1.8446744073709552e19));
    }
}

#[test]
fn destructured_fn_with_variadic_rest() {
    for mut env in [tree_walk_env(), vm_env()] {
        assert_eq!(
            eval_to_string(&mut env, "((fn [[a b & rest]] [a b rest]) [1 2 3 4])"),
            "[1 2 (3 4)]"
        );
    }
}

#[test]
fn transduce_through_hot_swapped_map() {
    let mut env = tree_walk_env();
    assert_eq!(eval_to_string(&mut env, "(transduce (map inc) + 0 (range 5))"), "15");
}

#[test]
fn hot_swap_replaces_tree_walk_roots_with_bytecode() {
    let env = tree_walk_env();
    assert_eq!(lumen_vm::bootstrap::fn_kind(&env, "core", "map"), Some("bytecode"));
    assert_eq!(lumen_vm::bootstrap::fn_kind(&env, "core", "reduce"), Some("bytecode"));
    // Not on the hot list: still the phase-1 closure.
    assert_eq!(lumen_vm::bootstrap::fn_kind(&env, "core", "every?"), Some("tree-walk"));

    let cold = Env::with_config(EnvConfig {
        hot_fns: Vec::new(),
        ..EnvConfig::default()
    })
    .expect("bootstrap");
    assert_eq!(lumen_vm::bootstrap::fn_kind(&cold, "core", "map"), Some("tree-walk"));
}

#[test]
fn sieve_of_stacked_filters_collapses_instead_of_nesting() {
    let mut env = tree_walk_env();
    // ~500 filters stacked over an infinite generator. Without chain
    // collapsing each element would recurse once per filter layer and
    // blow the evaluation depth limit.
    let src = "
        (def sieved
          (reduce (fn [acc n] (filter (fn [x] (not (zero? (mod x n)))) acc))
                  (iterate inc 2)
                  (range 2 500)))
        [(first sieved) (nth sieved 2)]";
    assert_eq!(eval_to_string(&mut env, src), "[503 521]");
}

#[test]
fn try_catch_around_divide_by_zero() {
    for mut env in [tree_walk_env(), vm_env()] {
        let v = env
            .eval_str("(try (/ 1 0) (catch Exception e (ex-message e)))", "test.clj")
            .unwrap();
        let Value::Str(msg) = v else { panic!("expected string, got {v:?}") };
        assert!(msg.contains("divide"), "message was {msg}");
    }
}

#[test]
fn named_fn_self_recursion() {
    for mut env in [tree_walk_env(), vm_env()] {
        assert_eq!(
            eval_to_string(&mut env, "((fn fact [n] (if (<= n 1) 1 (* n (fact (dec n))))) 10)"),
            "3628800"
        );
    }
}

#[test]
fn multimethod_with_default() {
    for mut env in [tree_walk_env(), vm_env()] {
        let src = "
            (defmulti area :shape)
            (defmethod area :square [{s :side}] (* s s))
            (defmethod area :default [_] :unknown)
            [(area {:shape :square :side 3}) (area {:shape :circle})]";
        assert_eq!(eval_to_string(&mut env, src), "[9 :unknown]");
    }
}

#[test]
fn multimethod_hierarchy_dispatch() {
    let mut env = tree_walk_env();
    let src = "
        (derive :rect :shape)
        (defmulti describe identity)
        (defmethod describe :shape [_] :some-shape)
        (describe :rect)";
    assert_eq!(eval_to_string(&mut env, src), ":some-shape");
}

#[test]
fn namespace_isolation_for_closures() {
    for mut env in [tree_walk_env(), vm_env()] {
        let src = "(ns a) (def x 1) (defn getx [] x) (ns b) (def x 2) (a/getx)";
        assert_eq!(eval_to_string(&mut env, src), "1");
    }
}

#[test]
fn lazy_transparency_at_equality_and_print_boundaries() {
    let mut env = tree_walk_env();
    assert_eq!(eval_to_string(&mut env, "(= (map inc (range 5)) (list 1 2 3 4 5))"), "true");
    assert_eq!(eval_to_string(&mut env, "(pr-str (map inc (range 3)))"), "\"(1 2 3)\"");
}

#[test]
fn destructuring_with_or_defaults_against_nil() {
    for mut env in [tree_walk_env(), vm_env()] {
        assert_eq!(
            eval_to_string(&mut env, "(let [{:keys [a b] :or {a 0 b 0}} nil] [a b])"),
            "[0 0]"
        );
    }
}

#[test]
fn recur_arity_mismatch_is_rejected() {
    let mut env = tree_walk_env();
    let err = env.eval_str("(loop [i 0] (recur 1 2))", "test.clj").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ArityError);
}

#[test]
fn dynamic_binding_is_lifo_and_survives_unwind() {
    let mut env = tree_walk_env();
    env.eval_str("(def ^:dynamic *level* 1)", "test.clj").unwrap();
    assert_eq!(
        eval_to_string(&mut env, "[(binding [*level* 2] *level*) *level*]"),
        "[2 1]"
    );
    // The frame pops even when the body throws.
    assert_eq!(
        eval_to_string(
            &mut env,
            "(try (binding [*level* 3] (throw (ex-info \"boom\" {}))) (catch Exception e *level*))"
        ),
        "1"
    );
}

#[test]
fn set_bang_mutates_only_the_active_binding() {
    let mut env = tree_walk_env();
    env.eval_str("(def ^:dynamic *v* 10)", "test.clj").unwrap();
    assert_eq!(
        eval_to_string(&mut env, "[(binding [*v* 20] (set! *v* 99) *v*) *v*]"),
        "[99 10]"
    );
    let err = env.eval_str("(def plain 1) (set! plain 2)", "test.clj").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn var_identity_is_stable_across_redef() {
    let mut env = tree_walk_env();
    let src = "(def x 1) (def saved #'x) (def x 2) [(identical? saved #'x) (deref #'x)]";
    assert_eq!(eval_to_string(&mut env, src), "[true 2]");
}

#[test]
fn case_dispatches_on_literal_values() {
    for mut env in [tree_walk_env(), vm_env()] {
        assert_eq!(eval_to_string(&mut env, "(case 2 1 :a 2 :b :c)"), ":b");
        assert_eq!(eval_to_string(&mut env, "(case 9 1 :a 2 :b :c)"), ":c");
    }
}

#[test]
fn for_comprehension_with_when() {
    let mut env = tree_walk_env();
    assert_eq!(
        eval_to_string(&mut env, "(for [x (range 3) y (range 3) :when (= x y)] [x y])"),
        "([0 0] [1 1] [2 2])"
    );
    assert_eq!(eval_to_string(&mut env, "(for [x (range 4)] (* x x))"), "(0 1 4 9)");
}

#[test]
fn atoms_swap_and_watchers() {
    let mut env = tree_walk_env();
    let src = "
        (def a (atom 0))
        (def seen (atom []))
        (add-watch a :w (fn [k r old new] (swap! seen conj [old new])))
        (swap! a + 5)
        (reset! a 10)
        [(deref a) (deref seen)]";
    assert_eq!(eval_to_string(&mut env, src), "[10 [[0 5] [5 10]]]");
}

#[test]
fn protocols_dispatch_on_type_key() {
    let mut env = tree_walk_env();
    let src = "
        (defprotocol Sized (size-of [this]))
        (extend-type String Sized (size-of [this] (count this)))
        (extend-type Integer Sized (size-of [this] :int))
        [(size-of \"hello\") (size-of 3)]";
    assert_eq!(eval_to_string(&mut env, src), "[5 :int]");
}

#[test]
fn defrecord_constructor_and_lookup() {
    let mut env = tree_walk_env();
    let src = "(defrecord Point [x y]) (def p (->Point 1 2)) [(:x p) (:y p)]";
    assert_eq!(eval_to_string(&mut env, src), "[1 2]");
}

#[test]
fn thrown_ex_info_is_catchable_with_data() {
    for mut env in [tree_walk_env(), vm_env()] {
        let src = "(try (throw (ex-info \"bad\" {:code 7})) (catch Exception e (:code (ex-data e))))";
        assert_eq!(eval_to_string(&mut env, src), "7");
    }
}

#[test]
fn deep_recursion_fails_cleanly_instead_of_overflowing() {
    let mut env = tree_walk_env();
    let err = env
        .eval_str("((fn boom [n] (+ 1 (boom (inc n)))) 0)", "test.clj")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InternalError);
    // Not catchable by user code.
    let err = env
        .eval_str("(try ((fn boom [n] (+ 1 (boom (inc n)))) 0) (catch Exception e :caught))", "test.clj")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InternalError);
}

#[test]
fn backend_parity_on_shared_snippets() {
    let snippets = [
        "(+ 1 2)",
        "(let [x 3 y 4] (* x y))",
        "(if false 1)",
        "((fn [a & more] [a more]) 1 2 3)",
        "(loop [i 0 acc 0] (if (< i 5) (recur (inc i) (+ acc i)) acc))",
        "(case :k :k 1 2)",
        "(try (throw (ex-info \"x\" {})) (catch Exception e :caught))",
        "[(vector 1 2) (list 3) {:a 1} #{9}]",
        "(reduce + 0 (range 10))",
    ];
    for src in snippets {
        let mut tw = tree_walk_env();
        let mut vm = vm_env();
        assert_eq!(
            eval_to_string(&mut tw, src),
            eval_to_string(&mut vm, src),
            "backends disagree on {src}"
        );
    }
}

#[test]
fn gc_collects_unreachable_atoms() {
    let mut env = Env::with_config(EnvConfig {
        gc_threshold_bytes: 1024,
        ..EnvConfig::default()
    })
    .expect("bootstrap");
    for _ in 0..200 {
        env.eval_str("(do (atom 1) nil)", "test.clj").unwrap();
    }
    let stats = env.gc_stats();
    assert!(stats.collections > 0, "no collection ran: {stats:?}");
    assert!(stats.bytes_freed > 0);
    // Reachable state survives the sweeps.
    env.eval_str("(def keeper (atom 42))", "test.clj").unwrap();
    for _ in 0..200 {
        env.eval_str("(do (atom 1) nil)", "test.clj").unwrap();
    }
    assert_eq!(eval_to_string(&mut env, "(deref keeper)"), "42");
}

#[test]
fn delay_memoizes_its_thunk() {
    let mut env = tree_walk_env();
    let src = "
        (def calls (atom 0))
        (def d (delay (do (swap! calls inc) :value)))
        [(deref d) (deref d) (deref calls)]";
    assert_eq!(eval_to_string(&mut env, src), "[:value :value 1]");
}

#[test]
fn letfn_supports_mutual_recursion() {
    for mut env in [tree_walk_env(), vm_env()] {
        let src = "
            (letfn* [(my-even? [n] (if (= n 0) true (my-odd? (dec n))))
                     (my-odd? [n] (if (= n 0) false (my-even? (dec n))))]
              [(my-even? 10) (my-odd? 7)])";
        assert_eq!(eval_to_string(&mut env, src), "[true true]");
    }
}

#[test]
fn keywords_maps_and_sets_are_callable() {
    for mut env in [tree_walk_env(), vm_env()] {
        assert_eq!(eval_to_string(&mut env, "(:a {:a 1})"), "1");
        assert_eq!(eval_to_string(&mut env, "({:a 1} :b 9)"), "9");
        assert_eq!(eval_to_string(&mut env, "(#{1 2} 2)"), "2");
        assert_eq!(eval_to_string(&mut env, "(#{1 2} 5)"), "nil");
    }
}

#[test]
fn read_string_pr_str_round_trip() {
    let mut env = tree_walk_env();
    let src = "(= (read-string (pr-str [1 :a \"s\" (list 2 3)])) [1 :a \"s\" (list 2 3)])";
    assert_eq!(eval_to_string(&mut env, src), "true");
}

#[test]
fn for_with_while_truncates_the_collection() {
    let mut env = tree_walk_env();
    assert_eq!(
        eval_to_string(&mut env, "(for [x (range 10) :while (< x 3)] x)"),
        "(0 1 2)"
    );
}

#[test]
fn math_interop_routes_to_builtin() {
    let mut env = tree_walk_env();
    assert_eq!(eval_to_string(&mut env, "(Math/pow 2 10)"), "1024");
}

#[test]
fn exact_integer_division_yields_ratio() {
    let mut env = tree_walk_env();
    assert_eq!(eval_to_string(&mut env, "(/ 10 2)"), "5");
    let v = env.eval_str("(/ 1 3)", "test.clj").unwrap();
    assert!(matches!(v, Value::Ratio(_)));
}
