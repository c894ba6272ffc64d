use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tern::Timer;

mod util;
use util::init_with_context;

#[test]
fn single_shot_fires_once() {
    let ioc = init_with_context();
    let timer = Timer::new(&ioc).unwrap();

    let fired = Rc::new(Cell::new(0usize));
    let fired2 = Rc::clone(&fired);
    let start = Instant::now();
    timer
        .schedule_once(Duration::from_millis(20), move || {
            fired2.set(fired2.get() + 1);
        })
        .unwrap();
    assert!(timer.is_armed());

    ioc.run_pending().unwrap();
    assert_eq!(fired.get(), 1);
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(!timer.is_armed());
    assert_eq!(ioc.pending(), 0);
}

#[test]
fn cancel_prevents_firing() {
    let ioc = init_with_context();
    let timer = Timer::new(&ioc).unwrap();

    timer
        .schedule_once(Duration::from_millis(20), || {
            panic!("cancelled timer must never fire");
        })
        .unwrap();
    assert_eq!(ioc.pending(), 1);

    timer.cancel();
    assert!(!timer.is_armed());
    assert_eq!(ioc.pending(), 0);

    // Give the original deadline a chance to pass, then verify silence.
    std::thread::sleep(Duration::from_millis(40));
    assert!(!ioc.poll_one().unwrap());
}

#[test]
fn repeating_fires_until_cancelled() {
    let ioc = init_with_context();
    let timer = Timer::new(&ioc).unwrap();

    let ticks = Rc::new(Cell::new(0usize));
    let ticks2 = Rc::clone(&ticks);
    let canceller = timer.clone();
    timer
        .schedule_repeating(Duration::from_millis(5), move || {
            ticks2.set(ticks2.get() + 1);
            if ticks2.get() == 3 {
                canceller.cancel();
            }
        })
        .unwrap();

    ioc.run_pending().unwrap();
    assert_eq!(ticks.get(), 3);
    assert!(!timer.is_armed());
    assert_eq!(ioc.pending(), 0);
}

/// Scheduling over an armed timer replaces the previous schedule.
#[test]
fn reschedule_replaces() {
    let ioc = init_with_context();
    let timer = Timer::new(&ioc).unwrap();

    timer
        .schedule_once(Duration::from_secs(60), || {
            panic!("replaced schedule must never fire");
        })
        .unwrap();

    let fired = Rc::new(Cell::new(false));
    let fired2 = Rc::clone(&fired);
    let start = Instant::now();
    timer
        .schedule_once(Duration::from_millis(10), move || fired2.set(true))
        .unwrap();

    ioc.run_pending().unwrap();
    assert!(fired.get());
    assert!(start.elapsed() < Duration::from_secs(30));
}

/// A single-shot callback may re-schedule from inside the callback.
#[test]
fn reschedule_from_callback() {
    let ioc = init_with_context();
    let timer = Timer::new(&ioc).unwrap();

    let fired = Rc::new(Cell::new(0usize));
    let fired2 = Rc::clone(&fired);
    let chained = timer.clone();
    timer
        .schedule_once(Duration::from_millis(5), move || {
            fired2.set(fired2.get() + 1);
            let fired3 = Rc::clone(&fired2);
            chained
                .schedule_once(Duration::from_millis(5), move || {
                    fired3.set(fired3.get() + 1);
                })
                .unwrap();
        })
        .unwrap();

    ioc.run_pending().unwrap();
    assert_eq!(fired.get(), 2);
}
