//! Movement Planner: flee, cohesion, wander and graze decisions. Every move is
//! a fire-and-forget path request to the world.

use crate::cache::{GrazeTarget, HerdCache};
use crate::config::{FleeMode, HerdType, SpeciesConfig};
use crate::hazard::HazardMap;
use crate::threat::Threat;
use crate::world::{EntitySnapshot, WorldQuery, max_slope, safe_ground};
use crate::{Position, Tick};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Speed tier of a member reacting to a threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FleeTier {
    /// Threat detected but farther than the flee distance: tighten up.
    Alert,
    Flee,
    Panic,
}

impl FleeTier {
    #[must_use]
    pub fn classify(distance_sq: f64, species: &SpeciesConfig, panic_active: bool) -> Self {
        if panic_active || distance_sq <= species.panic_range.powi(2) {
            Self::Panic
        } else if distance_sq <= species.flee_distance.powi(2) {
            Self::Flee
        } else {
            Self::Alert
        }
    }
}

/// Move requests issued by one planning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveTally {
    pub flee: usize,
    pub cohesion: usize,
    pub wander: usize,
    pub graze_moves: usize,
    pub grazed: usize,
}

/// Planning context for one herd on one tick.
pub struct MovementPlanner<'a, R: Rng + ?Sized> {
    pub world: &'a mut dyn WorldQuery,
    pub hazard: &'a mut HazardMap,
    pub species: &'a SpeciesConfig,
    pub rng: &'a mut R,
    pub now: Tick,
    pub night: bool,
}

impl<R: Rng + ?Sized> MovementPlanner<'_, R> {
    /// React every member to `threat`: panic and flee tiers run, alert-tier
    /// members close ranks on the leader.
    pub fn flee(
        &mut self,
        cache: &mut HerdCache,
        herd_center: Position,
        members: &[EntitySnapshot],
        leader: &EntitySnapshot,
        threat: &Threat,
    ) -> MoveTally {
        let mut tally = MoveTally::default();
        let species = self.species;
        for member in members {
            let id = member.id;
            let distance_sq = member.position.distance_squared(threat.position);
            if distance_sq <= species.panic_range.powi(2) {
                cache
                    .panic_until
                    .insert(id, self.now.plus(species.panic_duration_ticks));
            }
            let panic_active = cache
                .panic_until
                .get(&id)
                .is_some_and(|until| *until > self.now);
            let tier = FleeTier::classify(distance_sq, species, panic_active);

            if tier == FleeTier::Alert {
                cache.flee_tier.remove(&id);
                if self.cohere_member(cache, member, leader, true) {
                    tally.cohesion += 1;
                }
                continue;
            }

            let previous = cache.flee_tier.insert(id, tier);
            let escalated = previous.is_none_or(|previous| tier > previous);
            let throttled = cache
                .next_path
                .get(&id)
                .is_some_and(|next| *next > self.now);
            if throttled && !escalated {
                continue;
            }

            let origin = match species.flee_mode {
                FleeMode::Grouped => herd_center,
                FleeMode::Scatter => member.position,
            };
            let away = (origin.x - threat.position.x, origin.z - threat.position.z);
            let (distance, speed) = match tier {
                FleeTier::Panic => (species.panic_target_distance, species.panic_speed),
                _ => (species.flee_target_distance, species.flee_speed),
            };
            let target = self.flee_target(member.position, away, distance);
            if self.world.move_to(id, target, speed) {
                tally.flee += 1;
                cache
                    .next_path
                    .insert(id, self.now.plus(species.path_update_ticks));
            }
        }
        tally
    }

    /// Destination `distance` blocks along `away` from `from`.
    ///
    /// Candidates are sampled at increasing distances with angular jitter and
    /// must land on safe ground within the slope limit. The lowest hazard score
    /// below the must-avoid ceiling wins, then the least-bad candidate, then
    /// the plain away-vector point.
    pub fn flee_target(&mut self, from: Position, away: (f64, f64), distance: f64) -> Position {
        let species = self.species;
        let (dx, dz) = self.direction(away);
        let jitter = match species.flee_mode {
            FleeMode::Scatter => species.search_angle_radians(),
            FleeMode::Grouped => species.search_angle_radians() / 4.0,
        };
        let attempts = species.search_attempts.max(1);

        let mut best_safe: Option<(u8, i32, Position)> = None;
        let mut best_any: Option<(u8, i32, Position)> = None;
        for attempt in 0..attempts {
            let scale = if attempts == 1 {
                1.0
            } else {
                0.7 + 0.5 * f64::from(attempt) / f64::from(attempts - 1)
            };
            let angle = if jitter > 0.0 {
                self.rng.random_range(-jitter..=jitter)
            } else {
                0.0
            };
            let (rx, rz) = rotate(dx, dz, angle);
            let candidate = from.offset(rx * distance * scale, 0.0, rz * distance * scale);
            let Some((score, slope, ground)) = self.assess(candidate) else {
                continue;
            };
            let key = (score, slope);
            if score < species.must_avoid_score
                && best_safe.is_none_or(|(s, sl, _)| key < (s, sl))
            {
                best_safe = Some((score, slope, ground));
            }
            if best_any.is_none_or(|(s, sl, _)| key < (s, sl)) {
                best_any = Some((score, slope, ground));
            }
        }

        match best_safe.or(best_any) {
            Some((_, _, ground)) => ground,
            None => from.offset(dx * distance, 0.0, dz * distance),
        }
    }

    /// Pull `member` back toward the leader when it has drifted past its
    /// follow radius. Returns whether a move was requested.
    pub fn cohere_member(
        &mut self,
        cache: &mut HerdCache,
        member: &EntitySnapshot,
        leader: &EntitySnapshot,
        threatened: bool,
    ) -> bool {
        if member.id == leader.id {
            return false;
        }
        let species = self.species;
        let tight = self.night || species.herd_type == HerdType::Tight;
        let mut radius = species.follow_radius;
        let mut speed = species.cohesion_speed;
        if self.night {
            radius *= species.night_herd_radius_multiplier;
            speed *= species.night_herd_speed_multiplier;
        }
        if species.herd_type == HerdType::Tight {
            radius *= species.tight_herd_radius_multiplier;
        }
        if threatened {
            radius *= species.threat_herd_radius_multiplier;
            speed *= species.threat_herd_speed_multiplier;
        }
        if member.position.distance_squared(leader.position) <= radius * radius {
            return false;
        }
        if cache
            .next_path
            .get(&member.id)
            .is_some_and(|next| *next > self.now)
        {
            return false;
        }

        let target = if tight {
            let (fx, fz) = leader.facing_vector();
            leader.position.offset(
                -fx * species.trail_distance,
                0.0,
                -fz * species.trail_distance,
            )
        } else {
            leader.position
        };
        if self.world.move_to(member.id, target, speed) {
            cache
                .next_path
                .insert(member.id, self.now.plus(species.path_update_ticks));
            true
        } else {
            false
        }
    }

    /// Cohesion pass over every member.
    pub fn cohere(
        &mut self,
        cache: &mut HerdCache,
        members: &[EntitySnapshot],
        leader: &EntitySnapshot,
    ) -> usize {
        members
            .iter()
            .filter(|member| self.cohere_member(cache, member, leader, false))
            .count()
    }

    /// With a small chance, send the leader to a random low-hazard point
    /// within its wander radius. Returns whether a move was requested.
    pub fn wander(&mut self, cache: &mut HerdCache, leader: &EntitySnapshot) -> bool {
        let species = self.species;
        if species.wander_chance <= 0.0 {
            return false;
        }
        if cache
            .last_wander
            .get(&leader.id)
            .is_some_and(|last| self.now.since(*last) < species.wander_min_interval_ticks)
        {
            return false;
        }
        if !self.rng.random_bool(species.wander_chance) {
            return false;
        }

        let radius = species.follow_radius * species.wander_radius_multiplier;
        let mut best: Option<(u8, i32, Position)> = None;
        for _ in 0..species.wander_search_attempts {
            let candidate = self.random_offset(leader.position, radius);
            let Some((score, slope, ground)) = self.assess(candidate) else {
                continue;
            };
            if score >= species.must_avoid_score {
                continue;
            }
            if best.is_none_or(|(s, sl, _)| (score, slope) < (s, sl)) {
                best = Some((score, slope, ground));
            }
        }
        let Some((_, _, target)) = best else {
            return false;
        };
        if !self.world.move_to(leader.id, target, species.wander_speed) {
            return false;
        }
        cache.last_wander.insert(leader.id, self.now);
        cache
            .next_path
            .insert(leader.id, self.now.plus(species.path_update_ticks));
        true
    }

    /// Consume a pending graze target once an eater is in reach, then let the
    /// leader look for the next one when its graze timer allows.
    pub fn graze(
        &mut self,
        cache: &mut HerdCache,
        members: &[EntitySnapshot],
        leader: &EntitySnapshot,
    ) -> MoveTally {
        let mut tally = MoveTally::default();
        let species = self.species;
        if !species.grazing_enabled() || !species.in_graze_window(self.world.time_of_day()) {
            return tally;
        }

        if let Some(target) = cache.graze_targets.get(&leader.id).copied() {
            if self.consume(cache, members, target) {
                tally.grazed += 1;
                cache.graze_targets.remove(&leader.id);
            }
        }

        if cache
            .next_graze
            .get(&leader.id)
            .is_some_and(|next| *next > self.now)
        {
            return tally;
        }
        let interval = species.graze_interval_ticks;
        let jitter = self.rng.random_range(0..(interval / 3).max(1));
        cache
            .next_graze
            .insert(leader.id, self.now.plus(interval + jitter));

        let Some(target) = self.find_graze_target(leader.position) else {
            cache.graze_targets.remove(&leader.id);
            return tally;
        };
        cache.graze_targets.insert(leader.id, target);
        let (sx, sy, sz) = target.stand;
        let stand = Position::new(f64::from(sx) + 0.5, f64::from(sy), f64::from(sz) + 0.5);
        if self.world.move_to(leader.id, stand, species.graze_speed) {
            tally.graze_moves += 1;
            cache
                .next_path
                .insert(leader.id, self.now.plus(species.path_update_ticks));
        }
        tally
    }

    fn consume(
        &mut self,
        cache: &mut HerdCache,
        members: &[EntitySnapshot],
        target: GrazeTarget,
    ) -> bool {
        let species = self.species;
        let (bx, by, bz) = target.block;
        let material = self.world.block(bx, by, bz);
        if !species.graze_materials.contains(&material) {
            cache.graze_targets.retain(|_, pending| *pending != target);
            return false;
        }
        let center = Position::new(
            f64::from(bx) + 0.5,
            f64::from(by) + 0.5,
            f64::from(bz) + 0.5,
        );
        let reach_sq = species.graze_reach.powi(2);
        let now = self.now;
        let eaters: Vec<_> = members
            .iter()
            .filter(|member| member.position.distance_squared(center) <= reach_sq)
            .filter(|member| {
                cache
                    .last_graze
                    .get(&member.id)
                    .is_none_or(|last| now.since(*last) >= species.graze_interval_ticks)
            })
            .map(|member| member.id)
            .collect();
        if eaters.is_empty() || !self.world.set_block(bx, by, bz, material.grazed()) {
            return false;
        }
        for id in eaters {
            cache.last_graze.insert(id, now);
        }
        true
    }

    fn find_graze_target(&mut self, origin: Position) -> Option<GrazeTarget> {
        let species = self.species;
        for _ in 0..species.graze_search_attempts {
            let candidate = self.random_offset(origin, species.graze_radius);
            let Some(stand) = safe_ground(&*self.world, candidate, species.avoid_water) else {
                continue;
            };
            let (x, y, z) = stand.block();
            let cover = self.world.block(x, y, z);
            if species.graze_materials.contains(&cover) {
                return Some(GrazeTarget {
                    block: (x, y, z),
                    stand: (x, y, z),
                });
            }
            let ground = self.world.block(x, y - 1, z);
            if species.graze_materials.contains(&ground) {
                return Some(GrazeTarget {
                    block: (x, y - 1, z),
                    stand: (x, y, z),
                });
            }
        }
        None
    }

    /// Safe ground, slope and hazard score for a candidate column.
    fn assess(&mut self, candidate: Position) -> Option<(u8, i32, Position)> {
        let ground = safe_ground(&*self.world, candidate, self.species.avoid_water)?;
        let slope = max_slope(&*self.world, ground)?;
        if slope > self.species.max_slope {
            return None;
        }
        let score = self.hazard.score(&*self.world, ground, self.now);
        Some((score, slope, ground))
    }

    fn direction(&mut self, (dx, dz): (f64, f64)) -> (f64, f64) {
        let length = dx.hypot(dz);
        if length * length < 0.001 || !length.is_finite() {
            let angle = self.rng.random_range(0.0..TAU);
            (angle.cos(), angle.sin())
        } else {
            (dx / length, dz / length)
        }
    }

    fn random_offset(&mut self, origin: Position, radius: f64) -> Position {
        let angle = self.rng.random_range(0.0..TAU);
        let distance = if radius > 0.0 {
            self.rng.random_range(0.0..radius)
        } else {
            0.0
        };
        origin.offset(angle.cos() * distance, 0.0, angle.sin() * distance)
    }
}

fn rotate(x: f64, z: f64, angle: f64) -> (f64, f64) {
    let (sin, cos) = angle.sin_cos();
    (x * cos - z * sin, x * sin + z * cos)
}
