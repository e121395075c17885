use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::Error;
use crate::job::Job;

/// Ordered sequence of jobs the queue assigns from, front first.
///
/// Finished jobs stay on the stack until removed so callers can still read
/// their results.
#[derive(Debug, Default)]
pub struct JobStack {
    jobs: Vec<Job>,
}

impl JobStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.jobs.iter().position(|job| job.id == id)
    }

    pub fn get(&self, id: Uuid) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Job> {
        self.position(id).map(|pos| self.jobs.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.iter_mut()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.jobs.iter().map(|job| job.id).collect()
    }

    /// Reorder the stack to match `order`, which must name every job on the
    /// stack exactly once.
    ///
    /// Every position is validated before anything moves. Problems are
    /// reported one error per offending position; if there are any, the
    /// existing order is left untouched.
    pub fn reorder<S: AsRef<str>>(&mut self, order: &[S]) -> Vec<Error> {
        let mut errors = Vec::new();
        let current: HashMap<Uuid, usize> = self
            .jobs
            .iter()
            .enumerate()
            .map(|(pos, job)| (job.id, pos))
            .collect();

        let mut seen = HashSet::new();
        let mut indices = Vec::with_capacity(order.len());
        for (position, raw) in order.iter().enumerate() {
            let raw = raw.as_ref();
            let id = match Uuid::parse_str(raw) {
                Ok(id) => id,
                Err(_) => {
                    errors.push(Error::StackReorder {
                        position,
                        reason: format!("'{}' is not a job id", raw),
                    });
                    continue;
                }
            };
            let Some(&index) = current.get(&id) else {
                errors.push(Error::StackReorder {
                    position,
                    reason: format!("job {} is not on the stack", id),
                });
                continue;
            };
            if !seen.insert(id) {
                errors.push(Error::StackReorder {
                    position,
                    reason: format!("job {} is listed more than once", id),
                });
                continue;
            }
            indices.push(index);
        }

        if order.len() != self.jobs.len() {
            errors.push(Error::StackReorder {
                position: order.len(),
                reason: format!(
                    "order names {} jobs but the stack holds {}",
                    order.len(),
                    self.jobs.len()
                ),
            });
        }

        if !errors.is_empty() {
            return errors;
        }

        let mut slots: Vec<Option<Job>> = self.jobs.drain(..).map(Some).collect();
        self.jobs = indices
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();
        errors
    }
}
