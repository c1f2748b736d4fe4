use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use ember_job::{JobPriority, JobSystem, JobSystemDesc, WaitGroup};
use ember_job::job::{AffinityMask, Job};

fn block_until_signaled(group: &WaitGroup) {
    while !group.is_signaled() {
        std::thread::yield_now();
    }
}

#[test]
fn signal_before_wait_returns_immediately() {
    let system = JobSystem::new(JobSystemDesc { worker_count: 2 });
    system.start();

    let group = WaitGroup::new(1);
    group.signal();

    let done = WaitGroup::new(1);
    {
        let group = group.clone();
        system.spawn_signaling(JobPriority::Normal, &done, move || {
            // already signaled, must not suspend
            group.wait();
        });
    }

    block_until_signaled(&done);
    system.stop();
}

#[test]
fn many_signals_fan_into_one_waiter() {
    let system = JobSystem::new(JobSystemDesc { worker_count: 4 });
    system.start();

    const JOB_COUNT: u32 = 100;

    let group = WaitGroup::new(JOB_COUNT);
    let signaled_count = Arc::new(AtomicU32::new(0));
    let resume_count = Arc::new(AtomicU32::new(0));

    let done = WaitGroup::new(1);
    {
        let group = group.clone();
        let signaled_count = signaled_count.clone();
        let resume_count = resume_count.clone();

        system.spawn_signaling(JobPriority::Normal, &done, move || {
            group.wait();

            // every producer signal happens-before the wake
            assert_eq!(signaled_count.load(Ordering::Acquire), JOB_COUNT);
            resume_count.fetch_add(1, Ordering::Relaxed);
        });
    }

    for _ in 0..JOB_COUNT {
        let signaled_count = signaled_count.clone();
        system.spawn_signaling(JobPriority::Normal, &group, move || {
            signaled_count.fetch_add(1, Ordering::Release);
        });
    }

    block_until_signaled(&done);

    // the coordinator resumed exactly once
    assert_eq!(resume_count.load(Ordering::Relaxed), 1);
    system.stop();
}

#[test]
fn wait_chain_across_fibers() {
    let system = JobSystem::new(JobSystemDesc { worker_count: 2 });
    system.start();

    let first = WaitGroup::new(1);
    let second = WaitGroup::new(1);
    let order = Arc::new(AtomicUsize::new(0));

    let done = WaitGroup::new(2);
    {
        let first = first.clone();
        let second = second.clone();
        let order = order.clone();
        system.spawn_signaling(JobPriority::Normal, &done, move || {
            first.wait();
            assert_eq!(order.fetch_add(1, Ordering::AcqRel), 1);
            second.signal();
        });
    }
    {
        let first = first.clone();
        let order = order.clone();
        system.spawn_signaling(JobPriority::Normal, &done, move || {
            assert_eq!(order.fetch_add(1, Ordering::AcqRel), 0);
            first.signal();
        });
    }

    second.wait_blocking();
    block_until_signaled(&done);
    assert_eq!(order.load(Ordering::Acquire), 2);

    system.stop();
}

#[test]
fn affinity_pins_job_to_one_worker() {
    let system = JobSystem::new(JobSystemDesc { worker_count: 3 });
    system.start();

    let done = WaitGroup::new(8);
    let wrong_worker_count = Arc::new(AtomicU32::new(0));

    for _ in 0..8 {
        let wrong_worker_count = wrong_worker_count.clone();
        system.schedule(Job::new(
            JobPriority::Normal,
            AffinityMask::only(1),
            Some(done.clone()),
            move || {
                if JobSystem::current_worker_index() != Some(1) {
                    wrong_worker_count.fetch_add(1, Ordering::Relaxed);
                }
            },
        ));
    }

    block_until_signaled(&done);
    assert_eq!(wrong_worker_count.load(Ordering::Relaxed), 0);
    system.stop();
}

#[test]
fn priorities_drain_high_first_on_one_worker() {
    let system = JobSystem::new(JobSystemDesc { worker_count: 1 });

    let done = WaitGroup::new(2);
    let observed = Arc::new(AtomicUsize::new(0));

    // queue before starting so a single worker sees both at once
    {
        let observed = observed.clone();
        system.spawn_signaling(JobPriority::Background, &done, move || {
            observed.compare_exchange(1, 2, Ordering::AcqRel, Ordering::Acquire).unwrap();
        });
    }
    {
        let observed = observed.clone();
        system.spawn_signaling(JobPriority::High, &done, move || {
            observed.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire).unwrap();
        });
    }

    system.start();
    block_until_signaled(&done);
    assert_eq!(observed.load(Ordering::Acquire), 2);

    system.stop();
}
