//! Bounded retry bookkeeping.

use kiln_core::JobRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Push this record back onto the queue.
    Requeue(JobRecord),
    /// Budget exhausted, mark the job failed.
    GiveUp,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_job_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_job_retries: 5 }
    }
}

impl RetryPolicy {
    pub fn new(max_job_retries: u32) -> Self {
        Self { max_job_retries }
    }

    /// Free retries (`counted == false`) never touch the counter and never
    /// give up.
    pub fn decide(&self, job: &JobRecord, counted: bool) -> RetryDecision {
        if !counted {
            return RetryDecision::Requeue(job.clone());
        }
        if job.execution_count >= self.max_job_retries {
            return RetryDecision::GiveUp;
        }
        let mut next = job.clone();
        next.execution_count += 1;
        RetryDecision::Requeue(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counted_retries_are_bounded() {
        let policy = RetryPolicy::default();
        let mut job = JobRecord::new("example.org/a/b");
        let mut requeues = 0;

        while let RetryDecision::Requeue(next) = policy.decide(&job, true) {
            requeues += 1;
            job = next;
        }

        assert_eq!(requeues, 5);
        assert_eq!(job.execution_count, 5);
    }

    #[test]
    fn test_free_retries_keep_counter() {
        let policy = RetryPolicy::new(1);
        let mut job = JobRecord::new("r");
        job.execution_count = 7;
        assert_eq!(policy.decide(&job, false), RetryDecision::Requeue(job.clone()));
    }

    #[test]
    fn test_zero_budget_gives_up_immediately() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.decide(&JobRecord::new("r"), true), RetryDecision::GiveUp);
    }
}
