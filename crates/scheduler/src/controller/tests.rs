#[cfg(test)]
mod tests {
    use hashgrid_core::config::ThermalReclaim;
    use hashgrid_core::{ArbiterConfig, DropReason, Outcome, Payload, Tier, WorkId, WorkItem};

    use crate::controller::Controller;
    use crate::feeds::{Completion, IntegritySignal, SensorReading};
    use crate::policy::{PolicyKind, SchedulingPolicy};
    use crate::status::WorkerState;

    fn config(workers: usize) -> ArbiterConfig {
        let mut config = ArbiterConfig::default();
        config.pool.workers = workers;
        config
    }

    fn payload(seed: u8) -> Payload {
        Payload::new(vec![seed, 0xAB, 0xCD, 0x01])
    }

    /// Occupy workers directly, bypassing selection.
    fn preassign(c: &mut Controller, ids: std::ops::Range<usize>, load_pct: f64) {
        for id in ids {
            let item = WorkItem::new(WorkId(1000 + id as u64), Tier::Low, payload(1), 0);
            c.workers.assign(id, item, 0).unwrap();
            c.workers.get_mut(id).unwrap().load_pct = load_pct;
        }
    }

    #[test]
    fn sustained_high_load_switches_to_load_balanced() {
        let mut cfg = config(4);
        cfg.pool.fault_min_rounds = 100;
        let mut c = Controller::new(cfg).unwrap();
        preassign(&mut c, 0..4, 90.0);

        for _ in 0..15 {
            let report = c.run_round();
            assert!(report.policy_switch.is_none());
            assert_eq!(c.policy().kind(), PolicyKind::PerformanceAware);
        }
        let report = c.run_round();
        let switch = report.policy_switch.expect("switch at window boundary");
        assert_eq!(switch.from, PolicyKind::PerformanceAware);
        assert_eq!(switch.to, PolicyKind::LoadBalanced);
        assert_eq!(c.policy(), &SchedulingPolicy::LoadBalanced);
        assert_eq!(c.metrics().policy_switches, 1);
        assert_eq!(c.metrics().utilization_history, vec![90.0]);
    }

    #[test]
    fn fault_requeues_once_then_drops() {
        let mut cfg = config(1);
        cfg.pool.fault_min_rounds = 2;
        let mut c = Controller::new(cfg).unwrap();
        let handle = c.admission_handle();
        let id = handle.submit(payload(3), Tier::High).unwrap();

        let r1 = c.run_round();
        assert_eq!(r1.assignments.len(), 1);
        c.run_round();
        c.run_round();
        // elapsed 3 > 2: first fault requeues, and the item is reassigned the same round.
        let r4 = c.run_round();
        assert_eq!(r4.faulted, vec![0]);
        assert_eq!(r4.requeued, vec![id]);
        assert_eq!(r4.assignments.len(), 1);
        assert!(r4.drops.is_empty());

        c.run_round();
        c.run_round();
        let r7 = c.run_round();
        assert_eq!(r7.faulted, vec![0]);
        assert_eq!(r7.drops.len(), 1);
        assert_eq!(r7.drops[0].work_id, id);
        assert_eq!(r7.drops[0].reason, DropReason::DroppedAfterRetries);
        assert!(c.queues().is_empty());
        assert_eq!(c.workers().get(0).unwrap().state, WorkerState::Idle);
        assert_eq!(c.metrics().drops_for(DropReason::DroppedAfterRetries), 1);
    }

    #[test]
    fn completion_resets_fault_budget() {
        let mut cfg = config(1);
        cfg.pool.fault_min_rounds = 1;
        let mut c = Controller::new(cfg).unwrap();
        let feeds = c.feed_senders();
        let id = c.admission_handle().submit(payload(2), Tier::Medium).unwrap();

        c.run_round();
        c.run_round();
        let r3 = c.run_round();
        assert_eq!(r3.requeued, vec![id]);
        assert_eq!(c.fault_retries.get(&id), Some(&1));

        feeds.complete(Completion {
            worker_id: 0,
            work_id: id,
            outcome: Outcome::Exhausted,
            load_pct: 10.0,
        });
        let r4 = c.run_round();
        assert_eq!(r4.results.len(), 1);
        assert!(c.fault_retries.is_empty());
    }

    #[test]
    fn thermal_requeue_mode_puts_items_back() {
        let mut cfg = config(4);
        cfg.thermal.reclaim = ThermalReclaim::Requeue;
        cfg.pool.fault_min_rounds = 100;
        let mut c = Controller::new(cfg).unwrap();
        preassign(&mut c, 0..4, 50.0);

        c.feed_senders().report_sensor(SensorReading {
            estimated_power: 3.2,
            estimated_temp: 85.3,
        });
        let report = c.run_round();
        // (85.3 - 85) / 0.2 rounds up to 2 workers shed.
        assert_eq!(report.forced_idle, vec![3, 2]);
        assert_eq!(report.requeued, vec![WorkId(1003), WorkId(1002)]);
        assert!(report.results.is_empty());
        assert!(report.telemetry.throttled);
        assert_eq!(report.telemetry.active_cap, 2);
        assert_eq!(c.workers().active_count(), 2);
        assert_eq!(c.queues().depth(Tier::Low), 2);
    }

    #[test]
    fn emergency_mode_drives_qos_level() {
        let mut c = Controller::new(config(2)).unwrap();
        c.mode_flags().set_emergency(true);
        for expected in 1..=4u8 {
            assert_eq!(c.run_round().telemetry.level, expected);
        }
        assert_eq!(c.qos_state().escalation_count, 4);
    }

    #[test]
    fn starved_tier_served_in_window_that_ends_with_a_switch() {
        let mut c = Controller::new(config(1)).unwrap();
        let intake = c.admission_handle();
        let feeds = c.feed_senders();
        for n in 0..40 {
            intake.submit(payload(n), Tier::Critical).unwrap();
        }
        intake.submit(payload(99), Tier::Background).unwrap();
        c.mode_flags().set_emergency(true);
        c.mode_flags().set_power_save(true);

        let mut served = Vec::new();
        for round in 1..=16 {
            let report = c.run_round();
            assert_eq!(report.policy_switch.is_some(), round == 16);
            for a in &report.assignments {
                served.push(a.tier);
                feeds.complete(Completion {
                    worker_id: a.worker_id,
                    work_id: a.work_id,
                    outcome: Outcome::Exhausted,
                    load_pct: 50.0,
                });
            }
        }
        assert_eq!(c.policy().kind(), PolicyKind::RoundRobin);
        assert_eq!(served.len(), 16);
        // Slack is 0 from round 4, so the override lands in the window's last round.
        assert_eq!(served[15], Tier::Background);
        assert_eq!(c.queues().depth(Tier::Background), 0);
        // The next window starts clean.
        assert!(!c.queues().guard().was_serviced(Tier::Critical));
    }

    #[test]
    fn late_integrity_failure_counts_and_is_not_retained() {
        let mut cfg = config(1);
        cfg.security.lockdown_threshold = 1;
        let mut c = Controller::new(cfg).unwrap();
        let feeds = c.feed_senders();
        let id = c.admission_handle().submit(payload(5), Tier::Medium).unwrap();

        c.run_round();
        feeds.complete(Completion {
            worker_id: 0,
            work_id: id,
            outcome: Outcome::Found(vec![1]),
            load_pct: 30.0,
        });
        let published = c.run_round();
        assert!(published.results[0].outcome.is_found());

        feeds.report_integrity(IntegritySignal { work_id: id, valid: false });
        for n in 1000..2000 {
            feeds.report_integrity(IntegritySignal { work_id: WorkId(n), valid: false });
        }
        let report = c.run_round();
        assert!(report.lockdown_raised);
        assert_eq!(c.collector.pending_verdicts(), 0);

        for _ in 0..5 {
            c.run_round();
        }
        assert_eq!(c.collector.pending_verdicts(), 0);
    }

    #[test]
    fn qos_hint_tightens_starvation_slack() {
        let mut c = Controller::new(config(2)).unwrap();
        assert_eq!(c.queues().guard().slack(), 4);
        c.mode_flags().set_emergency(true);
        c.run_round();
        c.run_round();
        assert_eq!(c.queues().guard().slack(), 1);
        c.run_round();
        assert_eq!(c.queues().guard().slack(), 0);
    }
}
