//! Ordering guarantees of the scope stack
//!
//! Every test that cares about absolute depth runs its body on a fresh thread,
//! which starts with an empty stack.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;

use common::{entries, log, record};
use defer_scope::{DeferError, PopTarget, Scope};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

fn on_fresh_thread<R: Send + 'static>(f: impl FnOnce() -> R + Send + 'static) -> R {
    thread::spawn(f).join().expect("test thread panicked")
}

#[test]
fn actions_run_in_reverse_registration_order() {
    common::init_tracing();
    let seen = Rc::new(RefCell::new(Vec::new()));

    defer_scope::begin();
    for n in 1..=4 {
        let seen = Rc::clone(&seen);
        defer_scope::defer(move |n: i32| seen.borrow_mut().push(n), n);
    }
    defer_scope::end();

    assert_eq!(*seen.borrow(), vec![4, 3, 2, 1]);
}

#[test]
fn ending_inner_scope_leaves_outer_untouched() {
    let log = log();

    let outer = defer_scope::begin();
    defer_scope::defer_noarg(record(&log, "outer"));

    defer_scope::begin();
    defer_scope::defer_noarg(record(&log, "inner"));
    defer_scope::end();

    assert_eq!(entries(&log), vec!["inner"]);
    assert_eq!(defer_scope::current(), Some(outer));

    defer_scope::end();
    assert_eq!(entries(&log), vec!["inner", "outer"]);
}

#[rstest]
#[case::innermost(0, &["c2", "c1"])]
#[case::middle(1, &["c2", "c1", "b"])]
#[case::outermost(2, &["c2", "c1", "b", "a2", "a1"])]
fn pop_to_ancestor_unwinds_every_level_above(#[case] levels_up: usize, #[case] expected: &[&str]) {
    let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();

    let ran = on_fresh_thread(move || {
        let log = log();
        let a = defer_scope::begin();
        defer_scope::defer_noarg(record(&log, "a1"));
        defer_scope::defer_noarg(record(&log, "a2"));
        let b = defer_scope::begin();
        defer_scope::defer_noarg(record(&log, "b"));
        let c = defer_scope::begin();
        defer_scope::defer_noarg(record(&log, "c1"));
        defer_scope::defer_noarg(record(&log, "c2"));

        let target = [c, b, a][levels_up];
        defer_scope::pop(target);

        assert_eq!(defer_scope::depth(), 2 - levels_up);
        entries(&log)
    });

    assert_eq!(ran, expected);
}

#[test]
fn pop_all_empties_the_stack() {
    let ran = on_fresh_thread(|| {
        let log = log();
        for label in ["one", "two", "three"] {
            defer_scope::begin();
            defer_scope::defer_noarg(record(&log, label));
        }

        defer_scope::pop_all();
        assert_eq!(defer_scope::depth(), 0);
        assert_eq!(defer_scope::current(), None);
        entries(&log)
    });

    assert_eq!(ran, vec!["three", "two", "one"]);
}

#[test]
fn detached_scope_is_unaffected_by_stack_unwinding() {
    on_fresh_thread(|| {
        let log = log();
        let mut detached = Scope::new();
        detached.defer_noarg(record(&log, "detached"));

        defer_scope::begin();
        defer_scope::defer_noarg(record(&log, "stacked"));
        defer_scope::pop_all();

        assert_eq!(entries(&log), vec!["stacked"]);
        assert_eq!(detached.len(), 1);

        detached.delete();
        assert_eq!(entries(&log), vec!["stacked", "detached"]);
    });
}

#[test]
fn pushing_a_detached_scope_keeps_its_actions() {
    let log = log();
    let mut scope = Scope::new();
    scope.defer_noarg(record(&log, "before push"));

    let id = defer_scope::push(Some(scope));
    assert_eq!(defer_scope::current(), Some(id));
    defer_scope::defer_noarg(record(&log, "after push"));
    assert!(entries(&log).is_empty());

    defer_scope::end();
    assert_eq!(entries(&log), vec!["after push", "before push"]);
}

#[test]
fn arguments_reach_the_callback_unchanged() {
    let seen_u64 = Rc::new(Cell::new(0u64));
    let seen_addr = Rc::new(Cell::new(0usize));
    let seen_text = Rc::new(RefCell::new(String::new()));

    let value = Box::new(7u8);
    let addr = &raw const *value as usize;

    defer_scope::begin();
    {
        let seen = Rc::clone(&seen_u64);
        defer_scope::defer(move |v: u64| seen.set(v), u64::MAX);
    }
    {
        let seen = Rc::clone(&seen_addr);
        defer_scope::defer(move |b: Box<u8>| seen.set(&raw const *b as usize), value);
    }
    {
        let seen = Rc::clone(&seen_text);
        defer_scope::defer(move |s: String| *seen.borrow_mut() = s, "fd:17".to_string());
    }
    defer_scope::end();

    assert_eq!(seen_u64.get(), u64::MAX);
    assert_eq!(seen_addr.get(), addr);
    assert_eq!(*seen_text.borrow(), "fd:17");
}

#[test]
fn action_deferred_during_unwind_runs_in_same_unwind() {
    let log = log();

    defer_scope::begin();
    defer_scope::defer_noarg(record(&log, "first registered"));
    {
        let log = Rc::clone(&log);
        defer_scope::defer_noarg(move || {
            log.borrow_mut().push("outer action".into());
            defer_scope::defer_noarg(record(&log, "deferred while unwinding"));
        });
    }
    defer_scope::end();

    assert_eq!(
        entries(&log),
        vec!["outer action", "deferred while unwinding", "first registered"]
    );
}

#[test]
fn defer_on_targets_an_outer_scope() {
    let log = log();

    let outer = defer_scope::begin();
    defer_scope::begin();
    defer_scope::defer_on_noarg(outer, record(&log, "outer"));
    defer_scope::defer_noarg(record(&log, "inner"));

    defer_scope::end();
    assert_eq!(entries(&log), vec!["inner"]);

    defer_scope::end();
    assert_eq!(entries(&log), vec!["inner", "outer"]);
}

#[test]
fn clear_runs_actions_but_keeps_scope() {
    let log = log();

    let id = defer_scope::begin();
    defer_scope::defer_noarg(record(&log, "x"));
    defer_scope::defer_noarg(record(&log, "y"));

    defer_scope::clear(id);
    assert_eq!(entries(&log), vec!["y", "x"]);
    assert_eq!(defer_scope::current(), Some(id));

    defer_scope::defer_noarg(record(&log, "z"));
    defer_scope::end();
    assert_eq!(entries(&log), vec!["y", "x", "z"]);
}

#[test]
fn try_end_reports_empty_stack() {
    let result = on_fresh_thread(defer_scope::try_end);
    assert!(matches!(result, Err(DeferError::NoActiveScope { .. })));
}

#[test]
fn try_pop_reports_stale_handle() {
    let result = on_fresh_thread(|| {
        let stale = defer_scope::begin();
        defer_scope::end();
        defer_scope::begin();
        let result = defer_scope::try_pop(stale);
        defer_scope::end();
        result
    });

    let err = result.unwrap_err();
    assert_eq!(err.code(), "DEFER:STACK:UNKNOWN");
}

#[test]
fn try_pop_reports_handle_from_another_thread() {
    let foreign = on_fresh_thread(|| {
        let id = defer_scope::begin();
        defer_scope::end();
        id
    });

    let result = on_fresh_thread(move || {
        defer_scope::begin();
        let result = defer_scope::try_pop(PopTarget::Scope(foreign));
        defer_scope::end();
        result
    });

    assert!(matches!(result, Err(DeferError::ForeignScope { .. })));
}

#[test]
fn defer_without_scope_pushes_a_root() {
    let depth = on_fresh_thread(|| {
        defer_scope::defer_noarg(|| {});
        defer_scope::depth()
    });
    assert_eq!(depth, 1);
}

#[test]
fn stats_track_the_calling_thread() {
    let stats = on_fresh_thread(|| {
        defer_scope::begin();
        defer_scope::defer_noarg(|| {});
        defer_scope::begin();
        defer_scope::defer_noarg(|| {});
        defer_scope::defer_noarg(|| {});

        let open = defer_scope::stats();
        assert_eq!(open.depth, 2);
        assert_eq!(open.pending_actions, 3);

        defer_scope::end();
        defer_scope::stats()
    });

    assert_eq!(stats.depth, 1);
    assert_eq!(stats.pending_actions, 1);
    assert_eq!(stats.scopes_pushed, 2);
    assert_eq!(stats.scopes_popped, 1);
    assert_eq!(stats.actions_run, 2);
}

#[test]
fn with_scope_ends_before_returning() {
    let log = log();
    let depth = defer_scope::depth();

    let value = defer_scope::with_scope(|scope| {
        defer_scope::defer_on_noarg(scope, record(&log, "released"));
        assert_eq!(defer_scope::depth(), depth + 1);
        "result"
    });

    assert_eq!(value, "result");
    assert_eq!(entries(&log), vec!["released"]);
    assert_eq!(defer_scope::depth(), depth);
}

proptest! {
    #[test]
    fn unwinding_reverses_registration_order(
        layout in prop::collection::vec(0usize..6, 1..8),
    ) {
        let (ran, expected) = on_fresh_thread(move || {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let mut expected = Vec::new();
            let mut next = 0usize;

            for actions in &layout {
                defer_scope::begin();
                for _ in 0..*actions {
                    let seen = Rc::clone(&seen);
                    defer_scope::defer(move |n: usize| seen.borrow_mut().push(n), next);
                    expected.push(next);
                    next += 1;
                }
            }

            defer_scope::pop_all();
            expected.reverse();
            let ran = seen.borrow().clone();
            (ran, expected)
        });

        prop_assert_eq!(ran, expected);
    }

    #[test]
    fn pop_to_any_level_keeps_the_levels_below(
        depth in 1usize..10,
        target in 0usize..10,
    ) {
        let target = target % depth;
        let (remaining, ran) = on_fresh_thread(move || {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let mut ids = Vec::new();
            for level in 0..depth {
                ids.push(defer_scope::begin());
                let seen = Rc::clone(&seen);
                defer_scope::defer(move |n: usize| seen.borrow_mut().push(n), level);
            }

            defer_scope::pop(ids[target]);
            let remaining = defer_scope::depth();
            defer_scope::pop_all();
            let ran = seen.borrow().clone();
            (remaining, ran)
        });

        prop_assert_eq!(remaining, target);
        prop_assert_eq!(ran, (0..depth).rev().collect::<Vec<_>>());
    }
}
