//! Records which worker holds which job's lease at any instant, so tests
//! can assert P2 ("at most one worker holds a valid lease") and scenario 6
//! ("no two jobs share a `locked_by` concurrently") — spec §8.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct AcquisitionRecorder {
    held: Mutex<HashMap<String, String>>,
    violations: Mutex<Vec<String>>,
}

impl AcquisitionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acquire(&self, job_id: &str, worker_id: &str) {
        let mut held = self.held.lock().unwrap();
        if let Some(existing) = held.get(job_id) {
            self.violations.lock().unwrap().push(format!(
                "job {job_id} leased by {existing} and then by {worker_id} without a release"
            ));
        }
        held.insert(job_id.to_string(), worker_id.to_string());
    }

    pub fn record_release(&self, job_id: &str, worker_id: &str) {
        let mut held = self.held.lock().unwrap();
        match held.get(job_id) {
            Some(holder) if holder == worker_id => {
                held.remove(job_id);
            }
            Some(other) => self.violations.lock().unwrap().push(format!(
                "job {job_id} released by {worker_id} but was held by {other}"
            )),
            None => {}
        }
    }

    /// Jobs currently believed to be leased, for debugging a failed assertion.
    pub fn currently_held(&self) -> HashMap<String, String> {
        self.held.lock().unwrap().clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().unwrap().clone()
    }

    pub fn assert_no_violations(&self) {
        let violations = self.violations();
        assert!(violations.is_empty(), "lease exclusivity violated: {violations:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_acquire_without_release_is_a_violation() {
        let recorder = AcquisitionRecorder::new();
        recorder.record_acquire("job-1", "w1");
        recorder.record_acquire("job-1", "w2");
        assert_eq!(recorder.violations().len(), 1);
    }

    #[test]
    fn acquire_then_release_then_acquire_is_fine() {
        let recorder = AcquisitionRecorder::new();
        recorder.record_acquire("job-1", "w1");
        recorder.record_release("job-1", "w1");
        recorder.record_acquire("job-1", "w2");
        assert!(recorder.violations().is_empty());
    }
}
