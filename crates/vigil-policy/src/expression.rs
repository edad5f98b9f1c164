//! Expression algebra: the tagged tree a policy compiles to.
//!
//! Six variants, evaluated with short-circuit semantics over a single shared
//! event document:
//!
//! - `Term`: leaf operation, may mutate the event
//! - `And`: first failure wins
//! - `Or`: first success wins
//! - `Chain`: runs every child, succeeds unconditionally
//! - `Broadcast`: like `Chain`, children are logically independent
//! - `Implication`: antecedent gates consequent; the ok bit is the
//!   antecedent's
//!
//! Nodes are immutable after construction and shared by reference counting:
//! the same filter subtree may hang under many parents without cloning.
//! `Broadcast` is evaluated sequentially; terms mutate one shared document,
//! so parallel fan-out would need disjoint pointer subtrees per child.

use std::fmt;
use std::sync::Arc;

use crate::event::Event;
use crate::result::EvalResult;

/// A leaf operation: takes the event, returns a result carrying it back.
pub type EngineOp = Box<dyn Fn(Event) -> EvalResult + Send + Sync>;

enum Node {
    Term {
        name: String,
        op: EngineOp,
    },
    And {
        name: String,
        operands: Vec<Expression>,
    },
    Or {
        name: String,
        operands: Vec<Expression>,
    },
    Chain {
        name: String,
        operands: Vec<Expression>,
    },
    Broadcast {
        name: String,
        operands: Vec<Expression>,
    },
    Implication {
        name: String,
        operands: [Expression; 2],
    },
}

/// A shared, immutable expression node.
#[derive(Clone)]
pub struct Expression {
    node: Arc<Node>,
}

impl Expression {
    /// Leaf term wrapping an engine operation.
    pub fn term(name: impl Into<String>, op: EngineOp) -> Self {
        Expression::wrap(Node::Term {
            name: nonempty(name.into()),
            op,
        })
    }

    /// Conjunction; short-circuits on the first failed child.
    pub fn and(name: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::wrap(Node::And {
            name: nonempty(name.into()),
            operands,
        })
    }

    /// Disjunction; short-circuits on the first successful child.
    pub fn or(name: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::wrap(Node::Or {
            name: nonempty(name.into()),
            operands,
        })
    }

    /// Sequence; every child runs, the chain always succeeds.
    pub fn chain(name: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::wrap(Node::Chain {
            name: nonempty(name.into()),
            operands,
        })
    }

    /// Independent fan-out; every child runs, the broadcast always succeeds.
    pub fn broadcast(name: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::wrap(Node::Broadcast {
            name: nonempty(name.into()),
            operands,
        })
    }

    /// Antecedent-gated consequent; overall ok equals the antecedent's.
    pub fn implication(
        name: impl Into<String>,
        antecedent: Expression,
        consequent: Expression,
    ) -> Self {
        Expression::wrap(Node::Implication {
            name: nonempty(name.into()),
            operands: [antecedent, consequent],
        })
    }

    fn wrap(node: Node) -> Self {
        Expression {
            node: Arc::new(node),
        }
    }

    // -- inspectors ----------------------------------------------------------

    pub fn name(&self) -> &str {
        match &*self.node {
            Node::Term { name, .. }
            | Node::And { name, .. }
            | Node::Or { name, .. }
            | Node::Chain { name, .. }
            | Node::Broadcast { name, .. }
            | Node::Implication { name, .. } => name,
        }
    }

    /// Child expressions, in evaluation order. Empty for terms.
    pub fn operands(&self) -> &[Expression] {
        match &*self.node {
            Node::Term { .. } => &[],
            Node::And { operands, .. }
            | Node::Or { operands, .. }
            | Node::Chain { operands, .. }
            | Node::Broadcast { operands, .. } => operands,
            Node::Implication { operands, .. } => operands,
        }
    }

    pub fn is_term(&self) -> bool {
        matches!(&*self.node, Node::Term { .. })
    }

    pub fn is_and(&self) -> bool {
        matches!(&*self.node, Node::And { .. })
    }

    pub fn is_or(&self) -> bool {
        matches!(&*self.node, Node::Or { .. })
    }

    pub fn is_chain(&self) -> bool {
        matches!(&*self.node, Node::Chain { .. })
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(&*self.node, Node::Broadcast { .. })
    }

    pub fn is_implication(&self) -> bool {
        matches!(&*self.node, Node::Implication { .. })
    }

    /// Any non-leaf variant.
    pub fn is_operation(&self) -> bool {
        !self.is_term()
    }

    /// Whether two expressions are the same shared node (not just equal in
    /// shape). Composed graphs attach shared subtrees by reference.
    pub fn same_node(a: &Expression, b: &Expression) -> bool {
        Arc::ptr_eq(&a.node, &b.node)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match &*self.node {
            Node::Term { .. } => "Term",
            Node::And { .. } => "And",
            Node::Or { .. } => "Or",
            Node::Chain { .. } => "Chain",
            Node::Broadcast { .. } => "Broadcast",
            Node::Implication { .. } => "Implication",
        };
        write!(f, "{}({})", variant, self.name())?;
        if self.is_operation() {
            f.debug_list().entries(self.operands()).finish()?;
        }
        Ok(())
    }
}

fn nonempty(name: String) -> String {
    assert!(!name.is_empty(), "expression node names must be non-empty");
    name
}

// ===========================================================================
// Evaluation
// ===========================================================================

/// Evaluate an expression against an event without collecting traces.
pub fn evaluate(expr: &Expression, event: Event) -> EvalResult {
    eval_node(expr, event, None)
}

/// Evaluate an expression while collecting a per-node trace tree.
pub fn evaluate_traced(expr: &Expression, event: Event, tracer: &mut Tracer) -> EvalResult {
    eval_node(expr, event, Some(tracer))
}

fn eval_node(expr: &Expression, event: Event, mut tracer: Option<&mut Tracer>) -> EvalResult {
    match &*expr.node {
        Node::Term { name, op } => {
            let result = op(event);
            if let Some(t) = tracer.as_deref_mut() {
                t.record(name, result.trace());
            }
            result
        }

        Node::And { name, operands } => scoped(tracer, name, |tracer| {
            let mut current = event;
            let mut last = None;
            for child in operands {
                let result = eval_node(child, current, tracer.as_deref_mut());
                if !result.ok() {
                    return result;
                }
                current = result.event().clone();
                last = Some(result);
            }
            match last {
                Some(result) => result,
                None => EvalResult::success(current, Arc::from("and: no operands")),
            }
        }),

        Node::Or { name, operands } => scoped(tracer, name, |tracer| {
            let mut current = event;
            let mut last = None;
            for child in operands {
                let result = eval_node(child, current, tracer.as_deref_mut());
                if result.ok() {
                    return result;
                }
                current = result.event().clone();
                last = Some(result);
            }
            match last {
                Some(result) => result,
                None => EvalResult::failure(current, Arc::from("or: no operands")),
            }
        }),

        Node::Chain { name, operands } | Node::Broadcast { name, operands } => {
            scoped(tracer, name, |tracer| {
                let mut current = event;
                for child in operands {
                    let result = eval_node(child, current, tracer.as_deref_mut());
                    current = result.into_event();
                }
                EvalResult::success(current, Arc::from("chain: done"))
            })
        }

        Node::Implication { name, operands } => scoped(tracer, name, |tracer| {
            let antecedent = eval_node(&operands[0], event, tracer.as_deref_mut());
            if !antecedent.ok() {
                return antecedent;
            }
            let trace = antecedent.trace_arc();
            let consequent = eval_node(&operands[1], antecedent.into_event(), tracer.as_deref_mut());
            EvalResult::success(consequent.into_event(), trace)
        }),
    }
}

fn scoped<R>(
    mut tracer: Option<&mut Tracer>,
    name: &str,
    body: impl FnOnce(&mut Option<&mut Tracer>) -> R,
) -> R {
    if let Some(t) = tracer.as_deref_mut() {
        t.enter(name);
    }
    let result = body(&mut tracer);
    if let Some(t) = tracer.as_deref_mut() {
        t.leave();
    }
    result
}

// ===========================================================================
// Trace collection
// ===========================================================================

/// Opt-in trace collector.
///
/// When no tracer is supplied the evaluator touches no strings beyond the
/// prebuilt leaf traces. With a tracer, each operation node opens an indented
/// scope keyed by its name and each term appends its leaf trace.
#[derive(Debug, Default)]
pub struct Tracer {
    depth: usize,
    lines: Vec<String>,
}

impl Tracer {
    pub fn new() -> Self {
        Tracer::default()
    }

    fn enter(&mut self, name: &str) {
        self.lines
            .push(format!("{}{}", "  ".repeat(self.depth), name));
        self.depth += 1;
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn record(&mut self, _name: &str, trace: &str) {
        self.lines
            .push(format!("{}{}", "  ".repeat(self.depth), trace));
    }

    /// The collected trace tree, one node per line, indented by depth.
    pub fn report(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    /// A term that counts its invocations and returns a fixed verdict.
    fn counting_term(name: &str, ok: bool, counter: Arc<AtomicUsize>) -> Expression {
        let success: Arc<str> = Arc::from(format!("[{name}] -> Success"));
        let failure: Arc<str> = Arc::from(format!("[{name}] -> Failure"));
        Expression::term(
            name,
            Box::new(move |event| {
                counter.fetch_add(1, Ordering::SeqCst);
                if ok {
                    EvalResult::success(event, Arc::clone(&success))
                } else {
                    EvalResult::failure(event, Arc::clone(&failure))
                }
            }),
        )
    }

    fn marker_term(name: &str, path: &str, ok: bool) -> Expression {
        let path = path.to_owned();
        let trace: Arc<str> = Arc::from(format!("[{name}]"));
        Expression::term(
            name,
            Box::new(move |event| {
                event.set_bool(&path, true);
                let trace = Arc::clone(&trace);
                if ok {
                    EvalResult::success(event, trace)
                } else {
                    EvalResult::failure(event, trace)
                }
            }),
        )
    }

    #[test]
    fn term_returns_the_same_document() {
        let counter = Arc::new(AtomicUsize::new(0));
        let term = counting_term("t", true, counter);
        let event = Event::from_value(json!({}));
        let result = evaluate(&term, event.clone());
        assert!(Event::same_document(result.event(), &event));
    }

    #[test]
    fn or_short_circuits_on_first_success() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let c = Arc::new(AtomicUsize::new(0));
        let expr = Expression::or(
            "or",
            vec![
                counting_term("a", true, Arc::clone(&a)),
                counting_term("b", true, Arc::clone(&b)),
                counting_term("c", false, Arc::clone(&c)),
            ],
        );
        let result = evaluate(&expr, Event::new());
        assert!(result.ok());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn and_short_circuits_on_first_failure() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let c = Arc::new(AtomicUsize::new(0));
        let expr = Expression::and(
            "and",
            vec![
                counting_term("a", true, Arc::clone(&a)),
                counting_term("b", false, Arc::clone(&b)),
                counting_term("c", true, Arc::clone(&c)),
            ],
        );
        let result = evaluate(&expr, Event::new());
        assert!(!result.ok());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn chain_succeeds_whatever_the_children_do() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let expr = Expression::chain(
            "chain",
            vec![
                counting_term("a", false, Arc::clone(&a)),
                counting_term("b", false, Arc::clone(&b)),
            ],
        );
        let result = evaluate(&expr, Event::new());
        assert!(result.ok());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_runs_every_child() {
        let counters: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let expr = Expression::broadcast(
            "bcast",
            counters
                .iter()
                .enumerate()
                .map(|(i, c)| counting_term(&format!("t{i}"), i % 2 == 0, Arc::clone(c)))
                .collect(),
        );
        assert!(evaluate(&expr, Event::new()).ok());
        for c in &counters {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn implication_ok_bit_is_the_antecedents() {
        let cons_runs = Arc::new(AtomicUsize::new(0));

        // Antecedent succeeds, consequent fails: overall ok.
        let expr = Expression::implication(
            "imp",
            counting_term("ant", true, Arc::new(AtomicUsize::new(0))),
            counting_term("cons", false, Arc::clone(&cons_runs)),
        );
        assert!(evaluate(&expr, Event::new()).ok());
        assert_eq!(cons_runs.load(Ordering::SeqCst), 1);

        // Antecedent fails: consequent never runs, overall failure.
        let cons_runs2 = Arc::new(AtomicUsize::new(0));
        let expr2 = Expression::implication(
            "imp",
            counting_term("ant", false, Arc::new(AtomicUsize::new(0))),
            counting_term("cons", true, Arc::clone(&cons_runs2)),
        );
        assert!(!evaluate(&expr2, Event::new()).ok());
        assert_eq!(cons_runs2.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn or_keeps_mutations_of_failed_children() {
        let expr = Expression::or(
            "or",
            vec![
                marker_term("first", "/first", false),
                marker_term("second", "/second", false),
            ],
        );
        let event = Event::new();
        let result = evaluate(&expr, event.clone());
        assert!(!result.ok());
        // Failed children still wrote through the shared document.
        assert_eq!(event.get_bool("/first"), Some(true));
        assert_eq!(event.get_bool("/second"), Some(true));
    }

    #[test]
    fn empty_and_succeeds_empty_or_fails() {
        assert!(evaluate(&Expression::and("and", vec![]), Event::new()).ok());
        assert!(!evaluate(&Expression::or("or", vec![]), Event::new()).ok());
    }

    #[test]
    fn shared_subtree_evaluates_under_both_parents() {
        let shared_count = Arc::new(AtomicUsize::new(0));
        let shared = counting_term("shared", true, Arc::clone(&shared_count));
        let expr = Expression::chain("root", vec![shared.clone(), shared]);
        assert!(evaluate(&expr, Event::new()).ok());
        assert_eq!(shared_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tracer_collects_a_tree() {
        let expr = Expression::and(
            "check",
            vec![counting_term("t1", true, Arc::new(AtomicUsize::new(0)))],
        );
        let mut tracer = Tracer::new();
        evaluate_traced(&expr, Event::new(), &mut tracer);
        let report = tracer.report();
        assert!(report.starts_with("check"));
        assert!(report.contains("[t1] -> Success"));
    }
}
