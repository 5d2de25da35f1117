pub type TaskId = u64;

struct Task<C> {
    id: TaskId,
    remaining: u32,
    action: Option<Box<dyn FnOnce(&mut C)>>,
}

/// Cooperative per-tick scheduler. A task waits a fixed number of ticks and
/// then runs its continuation against the shared context; cancellation is
/// just forgetting the task. Nothing here blocks — `tick` is called once per
/// frame from the pump.
pub struct Ticker<C> {
    tasks: Vec<Task<C>>,
    next_id: TaskId,
}

impl<C> Default for Ticker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Ticker<C> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
        }
    }

    /// Schedule `action` to run after `ticks` calls to `tick`. Zero runs on
    /// the next tick.
    pub fn after(&mut self, ticks: u32, action: impl FnOnce(&mut C) + 'static) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.push(Task {
            id,
            remaining: ticks,
            action: Some(Box::new(action)),
        });
        id
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        self.tasks.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn tick(&mut self, ctx: &mut C) {
        let mut due = Vec::new();
        for task in &mut self.tasks {
            if task.remaining == 0 {
                if let Some(action) = task.action.take() {
                    due.push(action);
                }
            } else {
                task.remaining -= 1;
            }
        }
        self.tasks.retain(|task| task.action.is_some());
        for action in due {
            action(ctx);
        }
    }
}
