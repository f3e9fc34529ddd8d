//! Process-wide metrics with several managers
//!
//! Kept to a single test so nothing else in this binary moves the gauges.

mod common;

#[cfg(test)]
mod tests {
    use crate::common::{destination, manager, options, ScriptedTransport};
    use s3_fanout::fanout::{Classification, Job};
    use s3_fanout::metrics::HANDLES_IN_USE;
    use std::time::{Duration, Instant};

    #[test]
    fn test_handles_gauge_sums_over_managers() {
        let slow = ScriptedTransport::new(Ok(200)).with_delay(Duration::from_secs(30));
        let slow_state = slow.state();
        let busy = manager(options(2, 0, 1, 5), slow);
        let idle = manager(options(2, 0, 1, 5), ScriptedTransport::new(Ok(200)));

        std::thread::scope(|scope| {
            let producer = scope.spawn(|| busy.submit(Job::put_bytes(destination("slow"), "x")));

            let deadline = Instant::now() + Duration::from_secs(5);
            while slow_state.performed() < 1 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(HANDLES_IN_USE.get(), 1);

            // Binding and releasing on the other manager leaves the busy handle counted
            let report = idle.submit(Job::put_bytes(destination("fast"), "x"));
            assert!(report.is_success());
            assert_eq!(HANDLES_IN_USE.get(), 1);

            busy.stop();
            let report = producer.join().unwrap();
            assert_eq!(report.classification, Classification::LocalIo);
        });

        assert_eq!(HANDLES_IN_USE.get(), 0);
    }
}
