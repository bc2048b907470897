use perfscrub::domain::{Pid, ReplayError, ResolveError};
use perfscrub::mapping::ProcessAddressSpaceRegistry;
use perfscrub::replay::{read_events, replay, write_events, ReplayOutcome};
use perfscrub::resolver::ResolverOptions;
use perfscrub_common::{
    BranchEntry, CommEvent, ForkEvent, MmapEvent, PerfEvent, SampleEvent, KERNEL_PID,
};
use std::fs::File;
use std::io::BufReader;

const PAGE: u64 = 0x1000;
const PERF_CONTEXT_USER: u64 = u64::MAX - 511;

const KERNEL_START: u64 = 0xffff_ffff_8000_0000;
const KERNEL_TEXT: u64 = 0xffff_ffff_8100_0000;
const APP_BASE: u64 = 0x55_5555_4000;

fn options(do_remap: bool) -> ResolverOptions {
    ResolverOptions { do_remap, sample_mapping_percentage_threshold: 95.0, page_alignment: PAGE }
}

fn sample(pid: u32, ip: u64, callchain: Vec<u64>) -> PerfEvent {
    PerfEvent::Sample(SampleEvent { pid, tid: pid, ip, callchain, branch_stack: vec![] })
}

/// A kernel mmap, one process with one binary, and a forked child
fn capture() -> Vec<PerfEvent> {
    vec![
        PerfEvent::Mmap(MmapEvent {
            pid: KERNEL_PID,
            tid: 0,
            start: KERNEL_START,
            len: 0x4000_0000,
            pgoff: KERNEL_TEXT,
            filename: "[kernel.kallsyms]_text".to_string(),
            is_kernel: true,
        }),
        PerfEvent::Comm(CommEvent { pid: 10, tid: 10, comm: "app".to_string() }),
        PerfEvent::Mmap(MmapEvent {
            pid: 10,
            tid: 10,
            start: APP_BASE,
            len: 2 * PAGE,
            pgoff: 0,
            filename: "/usr/bin/app".to_string(),
            is_kernel: false,
        }),
        sample(10, APP_BASE + 0x123, vec![PERF_CONTEXT_USER, APP_BASE + 0x123, APP_BASE + 0x1010]),
        sample(10, KERNEL_TEXT + 0x40, vec![]),
        PerfEvent::Fork(ForkEvent { pid: 11, ppid: 10, tid: 11, ptid: 10 }),
        PerfEvent::Sample(SampleEvent {
            pid: 11,
            tid: 11,
            ip: APP_BASE + 0x200,
            callchain: vec![],
            branch_stack: vec![
                BranchEntry { from_ip: APP_BASE + 0x200, to_ip: APP_BASE + 0x1000, mispredicted: true },
                BranchEntry::default(),
            ],
        }),
    ]
}

/// Write events to a temp file and replay them from disk
fn replay_through_file(events: &[PerfEvent], do_remap: bool) -> Result<ReplayOutcome, ReplayError> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    write_events(File::create(&path).unwrap(), events).unwrap();

    let events = read_events(BufReader::new(File::open(&path).unwrap()))?;
    replay(events, options(do_remap))
}

#[test]
fn test_remap_rewrites_addresses() {
    let outcome = replay_through_file(&capture(), true).unwrap();

    let PerfEvent::Mmap(kernel) = &outcome.events[0] else { panic!("expected mmap") };
    assert_eq!((kernel.start, kernel.len, kernel.pgoff), (0, 0x3f00_0000, 0));

    // The process inherits the kernel range, so its binary lands after it
    let PerfEvent::Mmap(app) = &outcome.events[2] else { panic!("expected mmap") };
    assert_eq!(app.start, 0x3f00_0000);

    let PerfEvent::Sample(user) = &outcome.events[3] else { panic!("expected sample") };
    assert_eq!(user.ip, 0x3f00_0123);
    assert_eq!(user.callchain, vec![PERF_CONTEXT_USER, 0x3f00_0123, 0x3f00_1010]);

    let PerfEvent::Sample(kernel_sample) = &outcome.events[4] else { panic!("expected sample") };
    assert_eq!(kernel_sample.ip, 0x40);

    let PerfEvent::Sample(child) = &outcome.events[6] else { panic!("expected sample") };
    assert_eq!(child.ip, 0x3f00_0200);
    assert_eq!(child.branch_stack[0].to_ip, 0x3f00_1000);
    assert!(child.branch_stack[1].is_null());

    assert_eq!(outcome.stats.num_sample_events, 3);
    assert_eq!(outcome.stats.num_sample_events_mapped, 3);
    assert!(outcome.stats.did_remap);
    assert!(outcome.unsampled_mmaps.is_empty());
}

#[test]
fn test_resolved_records_name_dsos() {
    let outcome = replay_through_file(&capture(), true).unwrap();
    assert_eq!(outcome.resolved.len(), 3);

    let user = &outcome.resolved[0];
    assert_eq!(user.command.as_deref(), Some("app"));
    let ip = user.ip.as_ref().unwrap();
    assert_eq!((ip.dso.as_str(), ip.offset), ("/usr/bin/app", 0x123));
    // The IP copy in the call chain adds no entry
    assert_eq!(user.callchain.len(), 1);
    assert_eq!(user.callchain[0].offset, 0x1010);

    let kernel = outcome.resolved[1].ip.as_ref().unwrap();
    assert_eq!((kernel.dso.as_str(), kernel.offset), ("[kernel.kallsyms]_text", 0x40));

    let child = &outcome.resolved[2];
    assert_eq!(child.command.as_deref(), Some("app"));
    assert_eq!(child.branch_stack.len(), 1);
    assert!(!child.branch_stack[0].predicted);
    assert!(child.fully_mapped);
}

#[test]
fn test_no_remap_keeps_addresses() {
    let outcome = replay_through_file(&capture(), false).unwrap();

    let PerfEvent::Sample(user) = &outcome.events[3] else { panic!("expected sample") };
    assert_eq!(user.ip, APP_BASE + 0x123);
    let PerfEvent::Mmap(app) = &outcome.events[2] else { panic!("expected mmap") };
    assert_eq!(app.start, APP_BASE);

    assert_eq!(outcome.resolved[0].ip.as_ref().unwrap().offset, 0x123);
    assert!(!outcome.stats.did_remap);
}

#[test]
fn test_unmapped_samples_fail_threshold() {
    let mut events = capture();
    events.push(sample(10, 0x1234, vec![]));
    events.push(sample(12, 0x5678, vec![]));

    let err = replay_through_file(&events, true).unwrap_err();
    assert!(matches!(
        err,
        ReplayError::Resolve(ResolveError::BelowThreshold { mapped: 3, total: 5, .. })
    ));
}

#[test]
fn test_unsampled_mmaps_reported() {
    let mut events = capture();
    events.push(PerfEvent::Mmap(MmapEvent {
        pid: 10,
        tid: 10,
        start: 0x7f00_0000_0000,
        len: PAGE,
        pgoff: 0,
        filename: "/usr/lib/libunused.so".to_string(),
        is_kernel: false,
    }));

    let outcome = replay_through_file(&events, true).unwrap();
    assert_eq!(outcome.unsampled_mmaps, vec![7]);
}

#[test]
fn test_output_is_json_lines() {
    let outcome = replay_through_file(&capture(), true).unwrap();
    let mut buffer = Vec::new();
    write_events(&mut buffer, &outcome.events).unwrap();

    let text = String::from_utf8(buffer).expect("Invalid UTF-8");
    assert_eq!(text.lines().count(), outcome.events.len());
    for line in text.lines() {
        let parsed: serde_json::Value = serde_json::from_str(line).expect("Invalid JSON");
        assert!(parsed.get("type").is_some());
    }

    // Rewritten events replay cleanly
    let again = read_events(text.as_bytes()).unwrap();
    assert_eq!(again, outcome.events);
}

#[test]
fn test_fork_snapshot_is_independent() {
    let mut registry = ProcessAddressSpaceRegistry::new(PAGE);
    let (parent, _) = registry.get_or_create(Pid(1), Pid::KERNEL);
    parent.map_with_id(0x40_0000, PAGE, 1, 0, false).unwrap();

    let (child, created) = registry.get_or_create(Pid(2), Pid(1));
    assert!(created);
    assert_eq!(child.len(), 1);
    child.map_with_id(0x50_0000, PAGE, 2, 0, false).unwrap();

    let (parent, created) = registry.get_or_create(Pid(1), Pid::KERNEL);
    assert!(!created);
    parent.map_with_id(0x60_0000, PAGE, 3, 0, false).unwrap();

    assert_eq!(registry.get(Pid(1)).unwrap().len(), 2);
    assert_eq!(registry.get(Pid(2)).unwrap().len(), 2);
    assert!(registry.get(Pid(2)).unwrap().get_mapped_address_and_handle(0x60_0000).is_none());
    assert!(registry.get(Pid(1)).unwrap().get_mapped_address_and_handle(0x50_0000).is_none());
}
