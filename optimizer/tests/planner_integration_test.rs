//! Dependency graph and parallel planner integration tests.

use chrono::{TimeZone, Utc};

use query_optimizer::dag::{GraphBuilder, GraphError, ParallelPlanner, TaskSpec, ValidationWarning};

fn abc() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new("A").with_latency_ms(10),
        TaskSpec::new("B").depends_on("A").with_latency_ms(20),
        TaskSpec::new("C").depends_on("A").depends_on("B").with_latency_ms(5),
    ]
}

#[test]
fn test_two_node_cycle_is_rejected() {
    let tasks = vec![
        TaskSpec::new("A").depends_on("B"),
        TaskSpec::new("B").depends_on("A"),
    ];
    let err = GraphBuilder::default().build(&tasks).unwrap_err();
    assert!(matches!(err, GraphError::Cycle { .. }));
    let (from, to) = err.edge().unwrap();
    assert!(["A", "B"].contains(&from) && ["A", "B"].contains(&to));

    let plan_err = ParallelPlanner::new(4).plan_tasks(&tasks).unwrap_err();
    assert_eq!(plan_err, err);
}

#[test]
fn test_levels_follow_longest_dependency_chain() {
    let graph = GraphBuilder::default().build(&abc()).unwrap();
    assert_eq!(graph.node("A").unwrap().level, 0);
    assert_eq!(graph.node("B").unwrap().level, 1);
    assert_eq!(graph.node("C").unwrap().level, 2);
    assert_eq!(graph.level_count(), 3);
}

#[test]
fn test_critical_path_sums_latencies() {
    let graph = GraphBuilder::default().build(&abc()).unwrap();
    let (path, latency) = graph.critical_path();
    assert_eq!(path, vec!["A", "B", "C"]);
    assert_eq!(latency, 35);

    let plan = ParallelPlanner::new(4).plan(&graph);
    assert_eq!(plan.critical_path.nodes, vec!["A", "B", "C"]);
    assert_eq!(plan.critical_path.latency_ms, 35);
    assert_eq!(plan.sequential_latency_ms, 35);
    assert_eq!(plan.parallel_latency_ms, 35);
}

#[test]
fn test_unknown_dependency_is_structural() {
    let tasks = vec![TaskSpec::new("A").depends_on("ghost")];
    let err = GraphBuilder::default().build(&tasks).unwrap_err();
    assert_eq!(err, GraphError::unknown_dependency("A", "ghost"));
}

#[test]
fn test_fan_out_fan_in_plan() {
    let tasks = vec![
        TaskSpec::new("fetch").with_latency_ms(100),
        TaskSpec::new("left").depends_on("fetch").with_latency_ms(300),
        TaskSpec::new("right").depends_on("fetch").with_latency_ms(200),
        TaskSpec::new("merge")
            .depends_on("left")
            .depends_on("right")
            .with_latency_ms(50),
    ];
    let plan = ParallelPlanner::new(4).plan_tasks(&tasks).unwrap();

    assert_eq!(plan.groups.len(), 3);
    assert_eq!(plan.groups[1].nodes.len(), 2);
    assert_eq!(plan.groups[1].estimated_latency_ms, 300);
    assert_eq!(plan.sequential_latency_ms, 650);
    assert_eq!(plan.parallel_latency_ms, 450);
    assert!(plan.speedup > 1.0);
    assert_eq!(plan.critical_path.nodes, vec!["fetch", "left", "merge"]);
    assert!(plan.validation.is_clean());

    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let schedule = plan.schedule(start);
    assert_eq!(schedule.len(), 3);
    assert_eq!(schedule[0].start, start);
    for pair in schedule.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}

#[test]
fn test_long_chain_warns() {
    let tasks: Vec<TaskSpec> = (0..12)
        .map(|i| {
            let task = TaskSpec::new(format!("t{}", i)).with_latency_ms(1);
            if i == 0 {
                task
            } else {
                task.depends_on(format!("t{}", i - 1))
            }
        })
        .collect();
    let plan = ParallelPlanner::new(4).plan_tasks(&tasks).unwrap();
    assert!(plan
        .validation
        .warnings
        .iter()
        .any(|w| matches!(w, ValidationWarning::LongCriticalPath { length: 12, .. })));
}

#[test]
fn test_extreme_latencies_saturate() {
    let huge = u64::MAX / 2 + 1;
    let tasks = vec![
        TaskSpec::new("ingest").with_latency_ms(huge),
        TaskSpec::new("report").depends_on("ingest").with_latency_ms(huge),
    ];
    let plan = ParallelPlanner::new(4).plan_tasks(&tasks).unwrap();
    assert_eq!(plan.sequential_latency_ms, u64::MAX);
    assert_eq!(plan.parallel_latency_ms, u64::MAX);
    assert_eq!(plan.critical_path.latency_ms, u64::MAX);
    assert_eq!(plan.critical_path.nodes, vec!["ingest", "report"]);

    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let schedule = plan.schedule(start);
    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule[0].start, start);
    assert_eq!(schedule[1].end, chrono::DateTime::<Utc>::MAX_UTC);
    assert_eq!(schedule[0].end, schedule[1].start);
}

// ── Property: speedup grows with level width ───────────────────────

#[test]
fn prop_speedup_increases_with_width() {
    let cap = 8;
    let planner = ParallelPlanner::new(cap);
    let mut previous = 1.0;
    for n in 2..=cap {
        let mut tasks = vec![TaskSpec::new("root").with_latency_ms(100)];
        tasks.extend(
            (0..n).map(|i| TaskSpec::new(format!("w{}", i)).depends_on("root").with_latency_ms(100)),
        );
        let plan = planner.plan_tasks(&tasks).unwrap();
        assert!(
            plan.parallel_latency_ms < plan.sequential_latency_ms,
            "n={}: parallel {} !< sequential {}",
            n,
            plan.parallel_latency_ms,
            plan.sequential_latency_ms
        );
        assert!(plan.speedup > previous, "n={}: speedup {} <= {}", n, plan.speedup, previous);
        assert!(plan.speedup <= cap as f64 + 1.0, "n={}: speedup {}", n, plan.speedup);
        assert_eq!(plan.groups[1].max_parallelism, n.min(cap));
        previous = plan.speedup;
    }
}
