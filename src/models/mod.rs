//! Data layer: tasks, their audit events, the task type registry and the
//! archive.

pub mod archived_task;
pub mod task;
pub mod task_event;
pub mod task_type;

pub use archived_task::{ArchivedTask, ArchivedTaskRow};
pub use task::{NewTask, PageRequest, Task, TaskFilter, TaskPage, TaskRow, TASK_COLUMNS};
pub use task_event::{TaskEvent, TaskEventRow};
pub use task_type::TaskTypeDefinition;
