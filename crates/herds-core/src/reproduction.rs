//! Reproduction Scheduler: pairs eligible adults within spacing and cooldown
//! limits and requests at most one offspring per herd per pass.

use crate::cache::{Herd, HerdCache};
use crate::config::SpeciesConfig;
use crate::population::PopulationCounts;
use crate::world::{EntitySnapshot, HeightMode, WorldQuery, safe_ground};
use crate::{EntityId, EntityKind, Position, Tick};
use rand::Rng;
use tracing::debug;

const EXITS: [(i32, i32); 4] = [(0, -1), (0, 1), (1, 0), (-1, 0)];

/// What one herd's reproduction attempt amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BirthOutcome {
    /// A gate (disabled, target size, roll, caps, density, capacity) stopped the attempt.
    Gated,
    /// No eligible pair within spacing after every attempt.
    NoPair,
    /// The world refused the spawn; not retried this pass.
    SpawnFailed,
    Born {
        offspring: EntityId,
        parents: (EntityId, EntityId),
    },
}

/// Reproduction context for one (world, species) pair on one tick.
pub struct ReproductionScheduler<'a, R: Rng + ?Sized> {
    pub world: &'a mut dyn WorldQuery,
    pub kind: &'a EntityKind,
    pub species: &'a SpeciesConfig,
    pub rng: &'a mut R,
    pub now: Tick,
}

impl<R: Rng + ?Sized> ReproductionScheduler<'_, R> {
    pub fn reproduce(
        &mut self,
        cache: &mut HerdCache,
        counts: &PopulationCounts,
        herd: &Herd,
        members: &[EntitySnapshot],
    ) -> BirthOutcome {
        if !self.gates_open(counts, herd, members.len()) {
            return BirthOutcome::Gated;
        }

        let eligible: Vec<&EntitySnapshot> = members
            .iter()
            .filter(|member| self.is_eligible(cache, member))
            .collect();
        let Some((first, second)) = self.pick_pair(&eligible) else {
            return BirthOutcome::NoPair;
        };

        let at = first.position.midpoint(second.position);
        match self.world.spawn(self.kind, at) {
            Ok(offspring) => {
                self.world.set_juvenile(offspring);
                cache.last_reproduce.insert(first.id, self.now);
                cache.last_reproduce.insert(second.id, self.now);
                debug!(
                    species = %self.kind,
                    offspring = %offspring,
                    parent_a = %first.id,
                    parent_b = %second.id,
                    "offspring spawned"
                );
                BirthOutcome::Born {
                    offspring,
                    parents: (first.id, second.id),
                }
            }
            Err(error) => {
                debug!(species = %self.kind, %error, "offspring spawn rejected");
                BirthOutcome::SpawnFailed
            }
        }
    }

    fn gates_open(&mut self, counts: &PopulationCounts, herd: &Herd, size: usize) -> bool {
        let species = self.species;
        if !species.reproduction_enabled || size < 2 || size >= species.herd_target_size {
            return false;
        }
        if species.density_threshold > 0 && size > species.density_threshold {
            return false;
        }
        if counts.excess_around(herd.leader, species) > 0 {
            return false;
        }
        if species.reproduction_capacity_check && self.capacity(herd.cluster.center) <= size {
            return false;
        }
        self.rng.random_bool(species.reproduce_rate.clamp(0.0, 1.0))
    }

    /// Standable ground columns within the connectivity radius of `center`.
    pub fn capacity(&self, center: Position) -> usize {
        herd_capacity(&*self.world, self.species, center)
    }

    /// Adult, dry, on natural ground near the surface, off cooldown, and
    /// (when required) near water or next to an open exit.
    pub fn is_eligible(&self, cache: &HerdCache, member: &EntitySnapshot) -> bool {
        if !member.is_valid() || !member.adult || member.in_liquid {
            return false;
        }
        if cache.last_reproduce.get(&member.id).is_some_and(|last| {
            self.now.since(*last) < self.species.reproduce_cooldown_ticks
        }) {
            return false;
        }

        let world = &*self.world;
        let (x, y, z) = member.position.block();
        if !self.species.natural_ground.contains(&world.block(x, y - 1, z)) {
            return false;
        }
        let Some(surface) = world.surface(x, z, HeightMode::MotionBlockingNoLeaves) else {
            return false;
        };
        if (member.position.y - (f64::from(surface.y) + 1.0)).abs() > self.species.surface_tolerance
        {
            return false;
        }
        !self.species.require_water_or_exit || self.water_nearby(x, y, z) || open_exit(world, x, y, z)
    }

    fn water_nearby(&self, x: i32, y: i32, z: i32) -> bool {
        let radius = self.species.water_search_radius;
        let world = &*self.world;
        (-radius..=radius).any(|dx| {
            (-radius..=radius).any(|dz| {
                (y - 1..=y).any(|by| world.block(x + dx, by, z + dz).is_water())
            })
        })
    }

    /// Random eligible member plus its nearest eligible partner within spacing.
    fn pick_pair<'m>(
        &mut self,
        eligible: &[&'m EntitySnapshot],
    ) -> Option<(&'m EntitySnapshot, &'m EntitySnapshot)> {
        if eligible.len() < 2 {
            return None;
        }
        let spacing_sq = self.species.reproduce_spacing * self.species.reproduce_spacing;
        for _ in 0..self.species.reproduce_attempts {
            let first = eligible[self.rng.random_range(0..eligible.len())];
            let partner = eligible
                .iter()
                .filter(|other| other.id != first.id)
                .map(|other| (first.position.distance_squared(other.position), *other))
                .filter(|(dist_sq, _)| *dist_sq <= spacing_sq)
                .min_by(|a, b| a.0.total_cmp(&b.0));
            if let Some((_, second)) = partner {
                return Some((first, second));
            }
        }
        None
    }
}

/// Standable ground columns within the connectivity radius of `center`.
pub fn herd_capacity(
    world: &dyn WorldQuery,
    species: &SpeciesConfig,
    center: Position,
) -> usize {
    let radius = species.connectivity_radius;
    let reach = radius.ceil() as i32;
    let (cx, cy, cz) = center.block();
    let mut available = 0;
    for dx in -reach..=reach {
        for dz in -reach..=reach {
            if f64::from(dx * dx + dz * dz) > radius * radius {
                continue;
            }
            let column = Position::new(
                f64::from(cx + dx) + 0.5,
                f64::from(cy),
                f64::from(cz + dz) + 0.5,
            );
            if safe_ground(world, column, species.avoid_water).is_some() {
                available += 1;
            }
        }
    }
    available
}

/// A horizontal neighbour with room for feet and head.
fn open_exit(world: &dyn WorldQuery, x: i32, y: i32, z: i32) -> bool {
    EXITS.iter().any(|(dx, dz)| {
        world.block(x + dx, y, z + dz).is_passable()
            && world.block(x + dx, y + 1, z + dz).is_passable()
    })
}
