pub mod cancel;
pub mod scheduler;
pub mod time;
pub mod timer;

pub use scheduler::{
    ErrorHandler, RetryPolicy, SchedulerError, TaskDescriptor, TaskHandle, TaskKind, TaskOptions,
    TaskResult, TaskScheduler,
};
pub use timer::{ManualTimer, Timer, TimerHandle, TimerJob, TokioTimer};
