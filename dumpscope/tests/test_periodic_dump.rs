use dumpscope::context::AgentContext;
use dumpscope::domain::Handle;
use dumpscope::dumps::Sleeper;
use dumpscope::output::MemorySink;
use dumpscope::trackers::AllocationTracker;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

const MB: u64 = 1024 * 1024;

/// Virtual clock that grows the live total at 10s ticks: 1MB, 8MB, 9MB, 38MB
#[derive(Default)]
struct GrowingWorkload {
    allocations: OnceLock<Arc<AllocationTracker>>,
    state: Mutex<(Duration, u64, u64)>,
}

impl GrowingWorkload {
    fn target(now: Duration) -> u64 {
        match now.as_secs() {
            0..=9 => MB,
            10..=19 => 8 * MB,
            20..=29 => 9 * MB,
            _ => 38 * MB,
        }
    }

    fn grow(&self) {
        let Some(allocations) = self.allocations.get() else { return };
        let mut state = self.state.lock().unwrap();
        let (now, total, next) = *state;
        let target = Self::target(now);
        if target > total {
            allocations.log_size(target - total);
            allocations.log_result(Handle(next));
            *state = (now, target, next + 0x1000);
        }
    }
}

impl Sleeper for GrowingWorkload {
    fn sleep(&self, duration: Duration) {
        self.state.lock().unwrap().0 += duration;
        self.grow();
    }
}

#[test]
fn test_periodic_dumps_follow_percentage_gate() {
    let workload = Arc::new(GrowingWorkload::default());
    workload.state.lock().unwrap().2 = 0x10_0000;
    let exit_code = Arc::new(Mutex::new(None));
    let out = Arc::new(MemorySink::new());

    let context = {
        let exit_code = Arc::clone(&exit_code);
        AgentContext::builder()
            .sleeper(workload.clone())
            .exit_hook(Arc::new(move |code: i32| *exit_code.lock().unwrap() = Some(code)))
            .console(out.clone(), Arc::new(MemorySink::new()))
            .build()
    };
    assert!(workload.allocations.set(Arc::clone(context.allocations())).is_ok());
    workload.grow();

    context
        .configure(
            "traceNativeAllocations",
            "logDest=stdout,dumpCount=2,dumpInterval=1s,dumpDelay=10s,minPercentage=300,exitAfterLastDump",
        )
        .unwrap();
    context.check_commands().unwrap();
    context.start();

    let deadline = Instant::now() + Duration::from_secs(10);
    while exit_code.lock().unwrap().is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(*exit_code.lock().unwrap(), Some(0));

    let summaries: Vec<String> = out.lines().into_iter().filter(|line| line.starts_with("Printed ")).collect();
    assert_eq!(
        summaries,
        vec![
            format!("Printed 2 of 2 allocations with {} bytes (of {} bytes allocated in total).", 8 * MB, 8 * MB),
            format!("Printed 4 of 4 allocations with {} bytes (of {} bytes allocated in total).", 38 * MB, 38 * MB),
        ]
    );
    assert!(out.contains("Native memory allocation dump 1 of 2."));
    assert!(out.contains("Native memory allocation dump 2 of 2."));
    assert!(out.contains("Native memory allocation dumps finished. Exiting."));
    assert_eq!(context.allocations().throttle().last_total(), 38 * MB);
}
