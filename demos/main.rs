//! Runs a few small programs through the interpreter end to end, printing
//! what each one observed. Not a test: just a way to watch fork, join,
//! interrupt, and the semaphore play out against a real clock.

use std::time::Duration;

use skein::cause::Outcome;
use skein::effect::Effect;
use skein::fiber::fork;
use skein::runtime::Runtime;
use skein::scheduler::delay;
use skein::sync::{Ref, Semaphore};

fn main() {
    let rt = Runtime::new();

    let counted = rt.run_to_completion(fork_and_increment());
    println!("fork + join: {counted:?}");

    let interrupted = rt.run_to_completion(fork_and_interrupt());
    println!("fork + interrupt: {interrupted:?}");

    let (acquired, remaining) = match rt.run_to_completion(semaphore_walkthrough()) {
        Outcome::Value(pair) => pair,
        other => panic!("unexpected outcome: {other:?}"),
    };
    println!("semaphore: acquired={acquired} remaining={remaining}");
}

fn fork_and_increment() -> Effect<skein::cause::Never, i32> {
    let counter = Ref::new(0);
    let counter2 = counter.clone();
    fork(counter2.modify(|n| *n += 1)).chain(|fiber| fiber.join()).chain(move |_| counter.get())
}

fn fork_and_interrupt() -> Effect<skein::cause::Never, bool> {
    let reached_end = Ref::new(false);
    let reached_end_inner = reached_end.clone();
    fork(delay(Duration::from_millis(50)).chain(move |_| reached_end_inner.set(true))).chain(move |fiber| {
        fiber.interrupt_and_wait().chain(move |_| reached_end.get())
    })
}

fn semaphore_walkthrough() -> Effect<skein::cause::Never, (bool, usize)> {
    let sem = Semaphore::new(2);
    let sem2 = sem.clone();
    sem.try_acquire_n(2).chain(move |ok| sem2.count().map(move |c| (ok, c)))
}
