//! Dependency resolution: waves, cycles, topological order, critical path

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;
use tracing::warn;

use crate::domain::{Task, Wave};

/// Resolution errors
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Circular dependency among tasks: {0:?}")]
    CircularDependency(Vec<String>),

    #[error("Wave depth exceeded {0}")]
    WaveDepthExceeded(u32),
}

/// Validation outcome: warnings do not block, errors do
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Computes execution waves and dependency orderings
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    /// Upper bound on wave count, guarding against pathological graphs
    pub max_wave_depth: u32,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self { max_wave_depth: 100 }
    }
}

impl DependencyResolver {
    /// Peel tasks into waves: each wave holds tasks whose dependencies are
    /// all satisfied by earlier waves. A stall (remaining tasks, none
    /// admissible) is broken by force-admitting the first stalled task so
    /// progress is always made.
    pub fn calculate_waves(&self, tasks: &[Task]) -> Result<Vec<Wave>, ResolverError> {
        let known_ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut remaining: Vec<Task> = tasks.to_vec();
        let mut satisfied: HashSet<String> = HashSet::new();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            if waves.len() as u32 >= self.max_wave_depth {
                return Err(ResolverError::WaveDepthExceeded(self.max_wave_depth));
            }

            let wave_id = waves.len() as u32;
            let (mut admitted, rest): (Vec<Task>, Vec<Task>) = remaining.into_iter().partition(|t| {
                t.depends_on
                    .iter()
                    // Dependencies outside the task set cannot gate anything
                    .filter(|dep| known_ids.contains(dep.as_str()))
                    .all(|dep| satisfied.contains(dep))
            });
            remaining = rest;

            if admitted.is_empty() {
                // Stall: break it by forcing the first remaining task through
                let forced = remaining.remove(0);
                warn!(
                    task_id = %forced.id,
                    "Dependency stall, force-admitting task to keep the plan moving"
                );
                admitted.push(forced);
            }

            for task in &mut admitted {
                task.wave_id = wave_id;
                satisfied.insert(task.id.clone());
            }
            waves.push(Wave::new(wave_id, admitted));
        }

        Ok(waves)
    }

    /// Kahn's algorithm. Errors with the names of the tasks left on a cycle.
    pub fn topological_sort(&self, tasks: &[Task]) -> Result<Vec<Task>, ResolverError> {
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for task in tasks {
            for dep in &task.depends_on {
                if by_id.contains_key(dep.as_str()) {
                    *in_degree.get_mut(task.id.as_str()).unwrap() += 1;
                    dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
                }
            }
        }

        // Seed in input order so the result is deterministic
        let mut queue: VecDeque<&str> = tasks
            .iter()
            .map(|t| t.id.as_str())
            .filter(|id| in_degree[id] == 0)
            .collect();
        let mut sorted = Vec::new();

        while let Some(id) = queue.pop_front() {
            sorted.push((*by_id[id]).clone());
            for dependent in dependents.get(id).into_iter().flatten() {
                let deg = in_degree.get_mut(dependent).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if sorted.len() != tasks.len() {
            let sorted_ids: HashSet<&str> = sorted.iter().map(|t| t.id.as_str()).collect();
            let stuck: Vec<String> = tasks
                .iter()
                .filter(|t| !sorted_ids.contains(t.id.as_str()))
                .map(|t| t.name.clone())
                .collect();
            return Err(ResolverError::CircularDependency(stuck));
        }
        Ok(sorted)
    }

    /// DFS cycle detection returning concrete cycle paths
    pub fn detect_cycles(&self, tasks: &[Task]) -> Vec<Vec<String>> {
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut cycles = Vec::new();

        fn dfs<'a>(
            node: &'a str,
            by_id: &HashMap<&'a str, &'a Task>,
            visited: &mut HashSet<&'a str>,
            stack: &mut Vec<&'a str>,
            on_stack: &mut HashSet<&'a str>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            visited.insert(node);
            stack.push(node);
            on_stack.insert(node);

            if let Some(task) = by_id.get(node) {
                for dep in &task.depends_on {
                    let Some(dep_key) = by_id.keys().find(|k| **k == dep.as_str()) else {
                        continue;
                    };
                    if on_stack.contains(*dep_key) {
                        let start = stack.iter().position(|n| n == dep_key).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.clone());
                        cycles.push(cycle);
                    } else if !visited.contains(*dep_key) {
                        dfs(dep_key, by_id, visited, stack, on_stack, cycles);
                    }
                }
            }

            stack.pop();
            on_stack.remove(node);
        }

        for id in by_id.keys() {
            if !visited.contains(*id) {
                dfs(id, &by_id, &mut visited, &mut Vec::new(), &mut HashSet::new(), &mut cycles);
            }
        }
        cycles
    }

    /// Longest path by estimated minutes, memoized.
    /// Returns (task ids along the path, total minutes).
    pub fn critical_path(&self, tasks: &[Task]) -> (Vec<String>, u32) {
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut memo: HashMap<String, (Vec<String>, u32)> = HashMap::new();

        fn longest(
            id: &str,
            by_id: &HashMap<&str, &Task>,
            memo: &mut HashMap<String, (Vec<String>, u32)>,
            visiting: &mut HashSet<String>,
        ) -> (Vec<String>, u32) {
            if let Some(hit) = memo.get(id) {
                return hit.clone();
            }
            if !visiting.insert(id.to_string()) {
                return (vec![], 0);
            }
            let result = match by_id.get(id) {
                Some(task) => {
                    let best_dep = task
                        .depends_on
                        .iter()
                        .filter(|dep| by_id.contains_key(dep.as_str()))
                        .map(|dep| longest(dep, by_id, memo, visiting))
                        .max_by_key(|(_, minutes)| *minutes)
                        .unwrap_or((vec![], 0));
                    let mut path = best_dep.0;
                    path.push(id.to_string());
                    (path, best_dep.1 + task.estimated_minutes)
                }
                None => (vec![], 0),
            };
            visiting.remove(id);
            memo.insert(id.to_string(), result.clone());
            result
        }

        by_id
            .keys()
            .map(|id| longest(id, &by_id, &mut memo, &mut HashSet::new()))
            .max_by_key(|(_, minutes)| *minutes)
            .unwrap_or((vec![], 0))
    }

    /// Transitive dependency closure of a task
    pub fn all_dependencies(&self, tasks: &[Task], id: &str) -> HashSet<String> {
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(task) = by_id.get(current.as_str()) {
                for dep in &task.depends_on {
                    if seen.insert(dep.clone()) {
                        stack.push(dep.clone());
                    }
                }
            }
        }
        seen
    }

    /// Direct dependents of a task
    pub fn dependents(&self, tasks: &[Task], id: &str) -> Vec<String> {
        tasks
            .iter()
            .filter(|t| t.depends_on.iter().any(|d| d == id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Tasks whose dependencies are all in the completed set
    pub fn next_available<'a>(&self, tasks: &'a [Task], completed: &HashSet<String>) -> Vec<&'a Task> {
        tasks
            .iter()
            .filter(|t| !completed.contains(&t.id))
            .filter(|t| t.depends_on.iter().all(|d| completed.contains(d)))
            .collect()
    }

    /// Validate the graph: self-dependencies and cycles are errors,
    /// unknown dependencies only warn.
    pub fn validate(&self, tasks: &[Task]) -> ValidationReport {
        let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut report = ValidationReport::default();

        for task in tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    report.errors.push(format!("task '{}' depends on itself", task.name));
                } else if !known.contains(dep.as_str()) {
                    report
                        .warnings
                        .push(format!("task '{}' depends on unknown task '{}'", task.name, dep));
                }
            }
        }

        for cycle in self.detect_cycles(tasks) {
            report.errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        let mut t = Task::new("p-1", id, "desc");
        t.id = id.to_string();
        t.depends_on = deps.iter().map(|s| s.to_string()).collect();
        t
    }

    fn task_with_minutes(id: &str, deps: &[&str], minutes: u32) -> Task {
        let mut t = task(id, deps);
        t.estimated_minutes = minutes;
        t
    }

    #[test]
    fn test_linear_pipeline_three_waves() {
        let resolver = DependencyResolver::default();
        let tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t2"])];

        let waves = resolver.calculate_waves(&tasks).unwrap();
        assert_eq!(waves.len(), 3);
        for wave in &waves {
            assert_eq!(wave.tasks.len(), 1);
        }
        assert_eq!(waves[0].tasks[0].id, "t1");
        assert_eq!(waves[2].tasks[0].id, "t3");
    }

    #[test]
    fn test_fan_out_fan_in() {
        let resolver = DependencyResolver::default();
        let mut tasks = vec![task("t0", &[])];
        for i in 1..=4 {
            tasks.push(task(&format!("t{i}"), &["t0"]));
        }
        tasks.push(task("t5", &["t1", "t2", "t3", "t4"]));

        let waves = resolver.calculate_waves(&tasks).unwrap();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0].tasks.len(), 1);
        assert_eq!(waves[1].tasks.len(), 4);
        assert_eq!(waves[2].tasks.len(), 1);
    }

    #[test]
    fn test_empty_task_list_zero_waves() {
        let resolver = DependencyResolver::default();
        assert!(resolver.calculate_waves(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_single_task_one_wave() {
        let resolver = DependencyResolver::default();
        let waves = resolver.calculate_waves(&[task("only", &[])]).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].tasks.len(), 1);
    }

    #[test]
    fn test_every_wave_deps_satisfied_earlier() {
        let resolver = DependencyResolver::default();
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
            task("e", &["a", "d"]),
        ];
        let waves = resolver.calculate_waves(&tasks).unwrap();

        let mut earlier: HashSet<String> = HashSet::new();
        for wave in &waves {
            for t in &wave.tasks {
                for dep in &t.depends_on {
                    assert!(earlier.contains(dep), "dep {dep} of {} not in earlier waves", t.id);
                }
            }
            for t in &wave.tasks {
                earlier.insert(t.id.clone());
            }
        }
    }

    #[test]
    fn test_cycle_stall_is_broken() {
        let resolver = DependencyResolver::default();
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];

        // Force-admission keeps the plan moving despite the cycle
        let waves = resolver.calculate_waves(&tasks).unwrap();
        let total: usize = waves.iter().map(|w| w.tasks.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_unknown_deps_do_not_gate() {
        let resolver = DependencyResolver::default();
        let tasks = vec![task("a", &["not-in-set"])];
        let waves = resolver.calculate_waves(&tasks).unwrap();
        assert_eq!(waves.len(), 1);
    }

    #[test]
    fn test_topological_sort_permutation_iff_acyclic() {
        let resolver = DependencyResolver::default();
        let acyclic = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        assert!(resolver.detect_cycles(&acyclic).is_empty());
        let sorted = resolver.topological_sort(&acyclic).unwrap();
        assert_eq!(sorted.len(), 3);
        let pos = |id: &str| sorted.iter().position(|t| t.id == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));

        let cyclic = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])];
        assert!(!resolver.detect_cycles(&cyclic).is_empty());
        assert!(matches!(
            resolver.topological_sort(&cyclic),
            Err(ResolverError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_detect_cycles_paths() {
        let resolver = DependencyResolver::default();
        let tasks = vec![task("a", &["b"]), task("b", &["a"]), task("c", &[])];
        let cycles = resolver.detect_cycles(&tasks);
        assert!(!cycles.is_empty());
        // Any reported cycle contains both nodes
        assert!(cycles.iter().any(|c| c.contains(&"a".to_string()) && c.contains(&"b".to_string())));
    }

    #[test]
    fn test_critical_path() {
        let resolver = DependencyResolver::default();
        let tasks = vec![
            task_with_minutes("a", &[], 10),
            task_with_minutes("b", &["a"], 5),
            task_with_minutes("c", &["a"], 20),
            task_with_minutes("d", &["b", "c"], 5),
        ];

        let (path, minutes) = resolver.critical_path(&tasks);
        assert_eq!(minutes, 35); // a -> c -> d
        assert_eq!(path, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_all_dependencies_transitive() {
        let resolver = DependencyResolver::default();
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        let deps = resolver.all_dependencies(&tasks, "c");
        assert!(deps.contains("a"));
        assert!(deps.contains("b"));
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_dependents_direct() {
        let resolver = DependencyResolver::default();
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        assert_eq!(resolver.dependents(&tasks, "a"), vec!["b"]);
    }

    #[test]
    fn test_next_available() {
        let resolver = DependencyResolver::default();
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];

        let completed: HashSet<String> = ["a".to_string()].into();
        let next = resolver.next_available(&tasks, &completed);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, "b");
    }

    #[test]
    fn test_validate() {
        let resolver = DependencyResolver::default();
        let mut selfdep = task("a", &[]);
        selfdep.depends_on = vec!["a".to_string()];
        let tasks = vec![selfdep, task("b", &["ghost"])];

        let report = resolver.validate(&tasks);
        assert!(!report.is_ok());
        assert!(report.errors.iter().any(|e| e.contains("itself")));
        assert!(report.warnings.iter().any(|w| w.contains("ghost")));
    }

    #[test]
    fn test_wave_depth_guard() {
        let resolver = DependencyResolver { max_wave_depth: 2 };
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        assert!(matches!(
            resolver.calculate_waves(&tasks),
            Err(ResolverError::WaveDepthExceeded(2))
        ));
    }

    proptest::proptest! {
        /// For any acyclic graph, every task's dependencies land in
        /// strictly earlier waves and no task is lost.
        #[test]
        fn prop_waves_respect_dependencies(
            n in 1usize..16,
            edges in proptest::collection::vec((0usize..16, 0usize..16), 0..48),
        ) {
            // Edges only point backwards, so the graph is acyclic by construction
            let mut tasks: Vec<Task> = (0..n).map(|i| task(&format!("t{i}"), &[])).collect();
            for (a, b) in edges {
                let (a, b) = (a % n, b % n);
                if a == b {
                    continue;
                }
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                let dep = format!("t{lo}");
                if !tasks[hi].depends_on.contains(&dep) {
                    tasks[hi].depends_on.push(dep);
                }
            }

            let resolver = DependencyResolver::default();
            let waves = resolver.calculate_waves(&tasks).unwrap();

            let total: usize = waves.iter().map(|w| w.tasks.len()).sum();
            proptest::prop_assert_eq!(total, n);

            let mut earlier: HashSet<String> = HashSet::new();
            for wave in &waves {
                for t in &wave.tasks {
                    for dep in &t.depends_on {
                        proptest::prop_assert!(earlier.contains(dep), "dep {} of {} not in earlier wave", dep, t.id);
                    }
                }
                for t in &wave.tasks {
                    earlier.insert(t.id.clone());
                }
            }
        }
    }
}
