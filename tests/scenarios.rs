//! End-to-end scenarios driven through the public API only, against the
//! real scheduler and its default real-time clock. Mirrors the way the
//! teacher crate keeps its heavier, environment-level checks in a separate
//! `tests` crate instead of inline `#[cfg(test)]` modules.
//!
//! Every scenario below gives a just-forked fiber a turn with a short
//! `delay`, rather than asserting on wall-clock timing itself: the point is
//! interleaving, not latency.

use std::time::Duration;

use skein::cause::{Cause, Never, Outcome};
use skein::effect::Effect;
use skein::fiber::fork;
use skein::runtime::Runtime;
use skein::scheduler::delay;
use skein::sync::{Ref, Semaphore};

fn yield_once<E: 'static>() -> Effect<E, ()> {
    delay(Duration::from_millis(1))
}

#[test]
fn observable_acquisition() {
    let sem = Semaphore::new(4);
    let sem2 = sem.clone();
    let program: Effect<Never, usize> =
        fork(sem.acquire_n(3)).chain(move |_fiber| yield_once().chain(move |_| sem2.count()));
    let rt = Runtime::new();
    assert_eq!(rt.run_to_completion(program), Outcome::Value(1));
}

#[test]
fn observable_blocking_release() {
    let sem = Semaphore::new(0);
    let advanced = Ref::new(false);
    let advanced_for_fiber = advanced.clone();
    let sem_for_fiber = sem.clone();

    let program = fork(sem_for_fiber.with_permit(advanced_for_fiber.set(true))).chain(move |fiber| {
        sem.release().chain(move |_| fiber.wait().chain(move |_| advanced.get()))
    });
    let rt = Runtime::new();
    assert_eq!(rt.run_to_completion(program), Outcome::Value(true));
}

#[test]
fn interruptible_acquire() {
    let sem = Semaphore::new(1);
    let moved = Ref::new(false);
    let sem_for_fork = sem.clone();
    let moved_for_fork = moved.clone();

    let program =
        fork(sem_for_fork.acquire_n(2).chain(move |_| moved_for_fork.set(true))).chain(move |fiber| {
            yield_once().chain(move |_| {
                fiber
                    .interrupt_and_wait()
                    .chain(move |_| moved.get().chain(move |m| sem.count().map(move |c| (m, c))))
            })
        });
    let rt = Runtime::new();
    assert_eq!(rt.run_to_completion(program), Outcome::Value((false, 1)));
}

#[test]
fn interrupt_releases_no_permits_the_interrupted_fiber_never_held() {
    let sem = Semaphore::new(1);
    let moved = Ref::new(0i32);

    let sem1 = sem.clone();
    let moved1 = moved.clone();
    let sem2 = sem.clone();
    let moved2 = moved.clone();

    let program = fork(sem1.acquire_n(3).chain(move |_| moved1.set(1))).chain(move |fib1| {
        fork(sem2.acquire_n(1).chain(move |_| moved2.set(2))).chain(move |fib2| {
            fib1.interrupt_and_wait().chain(move |_| {
                fib2.join().chain(move |_| moved.get().chain(move |m| sem.count().map(move |c| (m, c))))
            })
        })
    });
    let rt = Runtime::new();
    assert_eq!(rt.run_to_completion(program), Outcome::Value((2, 0)));
}

#[test]
fn with_permits_n_returns_all_permits() {
    let sem = Semaphore::new(2);
    let sem2 = sem.clone();
    let rt = Runtime::new();
    let out = rt.run_to_completion(
        sem.with_permits_n(2, Effect::<Never, i32>::of(42)).chain(move |v| sem2.count().map(move |c| (v, c))),
    );
    assert_eq!(out, Outcome::Value((42, 2)));
}

#[test]
fn try_acquire_n_success_and_failure() {
    let rt = Runtime::new();

    let sem = Semaphore::new(2);
    let sem2 = sem.clone();
    let out = rt.run_to_completion(sem.try_acquire_n(1).chain(move |ok| sem2.count().map(move |c| (ok, c))));
    assert_eq!(out, Outcome::Value((true, 1)));

    let sem = Semaphore::new(2);
    let sem2 = sem.clone();
    let out = rt.run_to_completion(sem.try_acquire_n(3).chain(move |ok| sem2.count().map(move |c| (ok, c))));
    assert_eq!(out, Outcome::Value((false, 2)));
}

#[test]
fn fork_then_join_round_trips_the_value_across_a_delay() {
    let program = fork(yield_once::<Never>().chain(|_| Effect::of(99))).chain(|fiber| fiber.join());
    let rt = Runtime::new();
    assert_eq!(rt.run_to_completion(program), Outcome::Value(99));
}

#[test]
fn critical_section_defers_interruption_until_it_completes() {
    let ran_to_end = Ref::new(false);
    let ran_to_end_inner = ran_to_end.clone();

    let program = fork(yield_once::<Never>().chain(move |_| ran_to_end_inner.set(true)).critical())
        .chain(move |fiber| fiber.interrupt().chain(move |_| fiber.wait().chain(move |_| ran_to_end.get())));
    let rt = Runtime::new();
    assert_eq!(rt.run_to_completion(program), Outcome::Value(true));
}

#[test]
fn failed_effect_short_circuits_and_carries_its_cause() {
    let program: Effect<&'static str, i32> = Effect::failed("boom").chain(|_| Effect::of(1));
    let rt = Runtime::new();
    assert_eq!(rt.run_to_completion(program), Outcome::Failed(Cause::Raise("boom")));
}
