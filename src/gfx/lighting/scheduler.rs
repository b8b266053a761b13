//! Light importance scheduling
//!
//! Ranks visible lights by `intensity / distance²` from the camera and keeps
//! the top `K` when a per-frame budget is configured. The sort is stable, so
//! lights with equal scores keep their insertion order.

use cgmath::{MetricSpace, Point3};

use super::light::{LightId, LightSet};

/// Lower bound on the squared camera distance
pub const MIN_DISTANCE_SQUARED: f32 = 1e-4;

/// Importance score of a light seen from `camera`
pub fn importance(intensity: f32, light_position: Point3<f32>, camera: Point3<f32>) -> f32 {
    let distance2 = light_position.distance2(camera).max(MIN_DISTANCE_SQUARED);
    intensity / distance2
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledLight {
    pub id: LightId,
    pub score: f32,
}

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    /// Lights to shade this frame, highest score first
    pub included: Vec<ScheduledLight>,
    /// Visible lights cut by the budget, highest score first
    pub dropped: Vec<ScheduledLight>,
    /// Lights skipped for having no visible contribution
    pub invisible: usize,
}

impl Schedule {
    pub fn included_ids(&self) -> impl Iterator<Item = LightId> + '_ {
        self.included.iter().map(|l| l.id)
    }

    pub fn contains(&self, id: LightId) -> bool {
        self.included.iter().any(|l| l.id == id)
    }
}

/// Orders and budgets lights once per frame
#[derive(Debug, Clone, Copy, Default)]
pub struct LightScheduler {
    budget: Option<usize>,
}

impl LightScheduler {
    pub fn new(budget: Option<usize>) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> Option<usize> {
        self.budget
    }

    pub fn set_budget(&mut self, budget: Option<usize>) {
        self.budget = budget;
    }

    pub fn schedule(&self, lights: &LightSet, camera: Point3<f32>) -> Schedule {
        let mut invisible = 0;
        let mut ranked: Vec<ScheduledLight> = lights
            .iter()
            .filter_map(|(id, light)| {
                if !light.is_visible() {
                    invisible += 1;
                    return None;
                }
                Some(ScheduledLight {
                    id,
                    score: importance(light.intensity, light.position(), camera),
                })
            })
            .collect();

        // Stable: equal scores stay in insertion order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let keep = self.budget.unwrap_or(ranked.len()).min(ranked.len());
        let dropped = ranked.split_off(keep);

        Schedule {
            included: ranked,
            dropped,
            invisible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::lighting::light::{Light, LightDesc};
    use approx::assert_relative_eq;

    fn light_at(set: &mut LightSet, position: Point3<f32>, intensity: f32) -> LightId {
        let desc = LightDesc::directional(position, Point3::new(0.0, 0.0, 0.0))
            .with_intensity(intensity);
        set.insert(Light::from_desc(&desc).unwrap())
    }

    #[test]
    fn test_budget_picks_most_important() {
        let camera = Point3::new(0.0, 0.0, 0.0);
        let mut set = LightSet::new();
        let l1 = light_at(&mut set, Point3::new(10.0, 0.0, 0.0), 1.0);
        let l2 = light_at(&mut set, Point3::new(0.0, 5.0, 0.0), 5.0);

        let schedule = LightScheduler::new(Some(1)).schedule(&set, camera);
        assert_eq!(schedule.included.len(), 1);
        assert_eq!(schedule.included[0].id, l2);
        assert_relative_eq!(schedule.included[0].score, 0.2);
        assert_eq!(schedule.dropped[0].id, l1);
        assert_relative_eq!(schedule.dropped[0].score, 0.01);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let camera = Point3::new(0.0, 0.0, 0.0);
        let mut set = LightSet::new();
        let a = light_at(&mut set, Point3::new(3.0, 0.0, 0.0), 1.0);
        let b = light_at(&mut set, Point3::new(0.0, 3.0, 0.0), 1.0);
        let c = light_at(&mut set, Point3::new(0.0, 0.0, 3.0), 1.0);

        let schedule = LightScheduler::new(Some(2)).schedule(&set, camera);
        let ids: Vec<_> = schedule.included_ids().collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(schedule.dropped[0].id, c);
    }

    #[test]
    fn test_ordering_is_monotonic() {
        let camera = Point3::new(0.0, 1.0, 0.0);
        let mut set = LightSet::new();
        for i in 0..12 {
            let f = i as f32;
            light_at(&mut set, Point3::new(f, 2.0 + f * 0.5, -f), 1.0 + (i % 4) as f32);
        }

        for budget in 0..=12 {
            let schedule = LightScheduler::new(Some(budget)).schedule(&set, camera);
            let min_included = schedule
                .included
                .iter()
                .map(|l| l.score)
                .fold(f32::INFINITY, f32::min);
            for dropped in &schedule.dropped {
                assert!(dropped.score <= min_included);
            }
            for pair in schedule.included.windows(2) {
                assert!(pair[0].score >= pair[1].score);
            }
        }
    }

    #[test]
    fn test_budget_yields_min_of_budget_and_visible() {
        let camera = Point3::new(0.0, 0.0, 0.0);
        let mut set = LightSet::new();
        for i in 0..5 {
            light_at(&mut set, Point3::new(1.0 + i as f32, 1.0, 0.0), 1.0);
        }
        light_at(&mut set, Point3::new(1.0, 1.0, 1.0), 0.0);

        for budget in [0, 1, 3, 5, 8] {
            let schedule = LightScheduler::new(Some(budget)).schedule(&set, camera);
            assert_eq!(schedule.included.len(), budget.min(5));
            assert_eq!(schedule.invisible, 1);
        }
        let unlimited = LightScheduler::new(None).schedule(&set, camera);
        assert_eq!(unlimited.included.len(), 5);
    }

    #[test]
    fn test_light_at_camera_is_finite() {
        let score = importance(1.0, Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 0.0));
        assert!(score.is_finite());
    }
}
