//! Time estimation: heuristic baseline plus historical calibration

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::domain::Task;

/// Work category, inferred from the task text for calibration bucketing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    Test,
    Ui,
    Backend,
    Infrastructure,
    General,
}

/// Inferred complexity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

const HIGH_COMPLEXITY_KEYWORDS: &[&str] = &[
    "algorithm",
    "concurrency",
    "concurrent",
    "parallel",
    "security",
    "encryption",
    "migration",
    "refactor",
    "optimize",
    "distributed",
    "transaction",
];

const LOW_COMPLEXITY_KEYWORDS: &[&str] = &[
    "rename", "comment", "typo", "config", "constant", "format", "docs", "readme", "version",
];

/// Estimator configuration
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub base_minutes: f64,
    pub file_weight: f64,
    pub complexity_adjustment: f64,
    pub test_weight: f64,
    pub min_minutes: u32,
    pub max_minutes: u32,
    /// Rolling calibration window per category
    pub window_size: usize,
    /// Samples needed before history participates in estimates
    pub min_samples: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            base_minutes: 5.0,
            file_weight: 3.0,
            complexity_adjustment: 5.0,
            test_weight: 4.0,
            min_minutes: 5,
            max_minutes: 30,
            window_size: 100,
            min_samples: 5,
        }
    }
}

/// Heuristic + calibrated task time estimator
pub struct TimeEstimator {
    config: EstimatorConfig,
    history: HashMap<TaskCategory, VecDeque<u32>>,
}

impl Default for TimeEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

impl TimeEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
        }
    }

    /// Estimate minutes for a task, clamped to [min, max]
    pub fn estimate(&self, task: &Task) -> u32 {
        let heuristic = self.heuristic(task);
        let category = infer_category(task);

        let estimate = match self.historical_average(category) {
            // With enough history, blend heuristic and history 50/50
            Some(hist) => (heuristic + hist) / 2.0,
            None => heuristic,
        };

        let clamped = estimate.round().clamp(self.config.min_minutes as f64, self.config.max_minutes as f64);
        debug!(task = %task.name, heuristic, ?category, clamped, "Estimated task time");
        clamped as u32
    }

    fn heuristic(&self, task: &Task) -> f64 {
        let complexity_multiplier = match infer_complexity(task) {
            ComplexityLevel::Low => 0.0,
            ComplexityLevel::Medium => 1.0,
            ComplexityLevel::High => 2.0,
        };
        let has_tests = if task.test_criteria.is_empty() { 0.0 } else { 1.0 };

        self.config.base_minutes
            + self.config.file_weight * task.files.len() as f64
            + self.config.complexity_adjustment * complexity_multiplier
            + self.config.test_weight * has_tests
    }

    fn historical_average(&self, category: TaskCategory) -> Option<f64> {
        let window = self.history.get(&category)?;
        if window.len() < self.config.min_samples {
            return None;
        }
        Some(window.iter().map(|m| *m as f64).sum::<f64>() / window.len() as f64)
    }

    /// Feed back an actual duration for a finished task
    pub fn calibrate(&mut self, task: &Task, actual_minutes: u32) {
        let category = infer_category(task);
        let window = self.history.entry(category).or_default();
        if window.len() == self.config.window_size {
            window.pop_front();
        }
        window.push_back(actual_minutes);
        debug!(task = %task.name, ?category, actual_minutes, samples = window.len(), "Calibrated");
    }

    /// Plain sum of estimates; wave scheduling accounts for parallelism
    pub fn estimate_total(&self, tasks: &[Task]) -> u32 {
        tasks.iter().map(|t| self.estimate(t)).sum()
    }
}

fn haystack(task: &Task) -> String {
    format!("{} {}", task.name, task.description).to_lowercase()
}

/// Complexity from keyword sets over name + description
pub fn infer_complexity(task: &Task) -> ComplexityLevel {
    let text = haystack(task);
    if HIGH_COMPLEXITY_KEYWORDS.iter().any(|k| text.contains(k)) {
        ComplexityLevel::High
    } else if LOW_COMPLEXITY_KEYWORDS.iter().any(|k| text.contains(k)) {
        ComplexityLevel::Low
    } else {
        ComplexityLevel::Medium
    }
}

/// Category from text and touched files
pub fn infer_category(task: &Task) -> TaskCategory {
    let text = haystack(task);
    let files = task.files.join(" ").to_lowercase();

    if text.contains("test") || files.contains(".test.") || files.contains("spec") {
        TaskCategory::Test
    } else if text.contains("ui") || text.contains("component") || files.contains(".tsx") || files.contains(".css") {
        TaskCategory::Ui
    } else if text.contains("api") || text.contains("endpoint") || text.contains("database") || text.contains("server")
    {
        TaskCategory::Backend
    } else if text.contains("deploy") || text.contains("docker") || text.contains("pipeline") || text.contains("ci") {
        TaskCategory::Infrastructure
    } else {
        TaskCategory::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, desc: &str, files: usize, criteria: usize) -> Task {
        let mut t = Task::new("p-1", name, desc);
        t.files = (0..files).map(|i| format!("src/f{i}.rs")).collect();
        t.test_criteria = (0..criteria).map(|i| format!("criterion {i}")).collect();
        t
    }

    #[test]
    fn test_estimate_within_bounds() {
        let estimator = TimeEstimator::default();

        // Tiny task clamps up to min
        let tiny = task("rename variable", "rename a thing", 0, 0);
        assert_eq!(estimator.estimate(&tiny), 5);

        // Heavy task clamps down to max
        let heavy = task(
            "implement concurrency algorithm",
            "distributed transaction security migration",
            5,
            3,
        );
        assert_eq!(estimator.estimate(&heavy), 30);
    }

    #[test]
    fn test_estimate_scales_with_files() {
        let estimator = TimeEstimator::default();
        let small = task("add handler", "plain work", 1, 1);
        let large = task("add handler", "plain work", 4, 1);
        assert!(estimator.estimate(&large) > estimator.estimate(&small));
    }

    #[test]
    fn test_complexity_inference() {
        assert_eq!(
            infer_complexity(&task("fix typo", "comment update", 1, 0)),
            ComplexityLevel::Low
        );
        assert_eq!(
            infer_complexity(&task("add endpoint", "new route", 1, 0)),
            ComplexityLevel::Medium
        );
        assert_eq!(
            infer_complexity(&task("tune algorithm", "optimize the hot path", 1, 0)),
            ComplexityLevel::High
        );
    }

    #[test]
    fn test_category_inference() {
        assert_eq!(infer_category(&task("write tests", "unit tests", 1, 1)), TaskCategory::Test);
        assert_eq!(
            infer_category(&task("build component", "ui panel", 1, 0)),
            TaskCategory::Ui
        );
        assert_eq!(
            infer_category(&task("add endpoint", "api route", 1, 0)),
            TaskCategory::Backend
        );
        assert_eq!(
            infer_category(&task("deploy pipeline", "ci work", 1, 0)),
            TaskCategory::Infrastructure
        );
        assert_eq!(
            infer_category(&task("misc chore", "various", 1, 0)),
            TaskCategory::General
        );
    }

    #[test]
    fn test_calibration_blends_after_min_samples() {
        let mut estimator = TimeEstimator::default();
        let sample = task("misc chore", "general work", 2, 1);

        let before = estimator.estimate(&sample);

        // Fewer than min_samples: history ignored
        for _ in 0..4 {
            estimator.calibrate(&sample, 30);
        }
        assert_eq!(estimator.estimate(&sample), before);

        // Fifth sample activates blending toward the slower history
        estimator.calibrate(&sample, 30);
        let blended = estimator.estimate(&sample);
        assert!(blended > before, "expected {blended} > {before}");
    }

    #[test]
    fn test_calibration_window_bounded() {
        let mut estimator = TimeEstimator::new(EstimatorConfig {
            window_size: 3,
            ..Default::default()
        });
        let sample = task("misc chore", "general work", 1, 0);
        for minutes in [10, 20, 30, 40] {
            estimator.calibrate(&sample, minutes);
        }
        let window = estimator.history.get(&TaskCategory::General).unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(*window.front().unwrap(), 20);
    }

    #[test]
    fn test_estimate_total_is_sum() {
        let estimator = TimeEstimator::default();
        let tasks = vec![task("a", "x", 1, 1), task("b", "y", 2, 0)];
        let total = estimator.estimate_total(&tasks);
        assert_eq!(total, estimator.estimate(&tasks[0]) + estimator.estimate(&tasks[1]));
    }
}
