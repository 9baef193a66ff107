mod common;

use common::runtime;
use filament::time::Timer;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn counting_timer(handle: &filament::Handle, period: Duration) -> (Timer, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();

    let timer = Timer::new(handle, period, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    (timer, fired)
}

#[test]
fn test_timer_fires_once_per_arming() {
    let runtime = runtime();
    let (timer, fired) = counting_timer(runtime.handle(), Duration::from_millis(30));
    assert!(!timer.is_armed());

    timer.restart();
    assert!(timer.is_armed());

    thread::sleep(Duration::from_millis(200));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!timer.is_armed());
}

#[test]
fn test_restart_pushes_the_expiry_back() {
    let runtime = runtime();
    let (timer, fired) = counting_timer(runtime.handle(), Duration::from_millis(150));

    for _ in 0..6 {
        timer.restart();
        thread::sleep(Duration::from_millis(40));
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    thread::sleep(Duration::from_millis(400));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancelled_timer_never_fires() {
    let runtime = runtime();
    let (timer, fired) = counting_timer(runtime.handle(), Duration::from_millis(30));

    timer.restart();
    timer.cancel();
    assert!(!timer.is_armed());

    thread::sleep(Duration::from_millis(150));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
