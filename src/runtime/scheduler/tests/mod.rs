//! Scheduler unit tests
//!
//! Task identity and state, builder defaults, configuration, and the
//! behaviour of both lanes.

mod queue;

use crate::runtime::scheduler::{
    Lane, ResumePolicy, Scheduler, SchedulerConfig, SchedulerError, TaskBuilder, TaskId,
    TaskIdGenerator, TaskState,
};
use std::time::Duration;

/// Small pool with short parks, so tests do not wait on idle workers.
pub(super) fn test_config(num_workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        num_workers,
        idle_timeout: Duration::from_millis(1),
        frame_interval: Duration::from_millis(1),
    }
}

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(5).to_string(), "Task(5)");
        assert_eq!(TaskId::from(3).inner(), 3);
    }

    #[test]
    fn test_generator_is_sequential() {
        let ids = TaskIdGenerator::new();
        assert_eq!(ids.next(), TaskId(0));
        assert_eq!(ids.next(), TaskId(1));
        assert_ne!(ids.next(), TaskId(1));
    }
}

#[cfg(test)]
mod task_state_tests {
    use super::*;

    #[test]
    fn test_task_state_roundtrip() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Suspended,
            TaskState::Completed,
            TaskState::Faulted,
            TaskState::Cancelled,
        ] {
            assert_eq!(TaskState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Suspended.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Faulted.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }
}

#[cfg(test)]
mod task_builder_tests {
    use super::*;

    #[test]
    fn test_defaults_pin_to_main() {
        let header = TaskBuilder::new().into_header(TaskId(9));
        assert_eq!(header.lane(), Lane::Main);
        assert_eq!(header.policy(), ResumePolicy::MainContext);
        assert_eq!(header.name(), "Task(9)");
        assert_eq!(header.state(), TaskState::Pending);
    }

    #[test]
    fn test_builder_options() {
        let header = TaskBuilder::new()
            .name("loader")
            .lane(Lane::Worker)
            .resume_on(ResumePolicy::Unspecified)
            .into_header(TaskId(1));
        assert_eq!(header.name(), "loader");
        assert_eq!(header.lane(), Lane::Worker);
        assert_eq!(header.policy(), ResumePolicy::Unspecified);
    }
}

#[cfg(test)]
mod scheduler_config_tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.num_workers >= 1);
        assert_eq!(config.frame_interval, Duration::from_millis(16));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Scheduler::with_config(test_config(0)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn test_scheduler_reports_config() {
        let scheduler = Scheduler::with_config(test_config(3)).unwrap();
        assert_eq!(scheduler.num_workers(), 3);
        assert!(scheduler.is_running());
        assert!(scheduler.current_context().is_main());
    }
}
