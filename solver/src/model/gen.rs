use crate::model::Stnu;
use rand::rngs::SmallRng;
use rand::Rng;

/// Generates a consistent chain-shaped STNU, a shape common in practice: an
/// agent alternates contingent travel legs with tasks whose duration it
/// controls. `tasks` is the number of controllable legs and `free` the total
/// length of their intervals; a makespan is drawn between the sum of the
/// lower and upper bounds. Networks are redrawn until consistent.
pub fn generate_chain(tasks: usize, free: f64, rng: &mut SmallRng) -> Stnu {
    assert!(tasks >= 1);
    let total_events = 2 * (tasks + 1) as u32;

    loop {
        let mut stnu = Stnu::new();
        for v in 0..total_events {
            stnu.add_vertex(v);
        }

        // split `free` over the controllable legs, proportionally to a draw
        let draws: Vec<f64> = (0..tasks).map(|_| rng.random_range(0.0..150.0)).collect();
        let total: f64 = draws.iter().sum();
        let mut lengths: Vec<f64> = draws.iter().map(|x| x / total * free).collect();
        let drift: f64 = free - lengths.iter().sum::<f64>();
        *lengths.last_mut().expect("tasks >= 1") += drift;

        let mut low_sum = 0.0;
        let mut up_sum = 0.0;
        for i in 0..total_events - 1 {
            let (lb, len, contingent) = if i % 2 == 0 {
                (rng.random_range(0.0..=50.0), rng.random_range(0.0..=50.0), true)
            } else {
                (rng.random_range(0.0..=100.0), lengths[(i as usize - 1) / 2], false)
            };
            low_sum += lb;
            up_sum += lb + len;
            let added = if contingent {
                stnu.add_contingent(i, i + 1, lb, lb + len)
            } else {
                stnu.add_requirement(i, i + 1, lb, lb + len)
            };
            added.expect("chain edges are structurally valid");
        }

        let makespan = rng.random_range(low_sum..=up_sum);
        stnu.add_requirement(0, tasks as u32 * 2, 0.0, makespan)
            .expect("makespan edge is structurally valid");

        if stnu.is_consistent() {
            return stnu;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_chain_shape() {
        let mut rng = SmallRng::seed_from_u64(3);
        let stnu = generate_chain(2, 40.0, &mut rng);
        assert_eq!(stnu.num_verts(), 6);
        // one contingent per even-indexed leg, minus none dropped
        assert_eq!(stnu.contingent_edges().count(), 3);
        assert!(stnu.is_consistent());
    }
}
