//! Population Controller: soft-cap culls, the density throttle, the
//! capacity-based overcrowding cull, the nightly total cap and drowning cleanup.

use crate::cache::{Herd, HerdCache};
use crate::config::SpeciesConfig;
use crate::reproduction::herd_capacity;
use crate::world::{EntitySnapshot, WorldQuery, in_deep_water};
use crate::{Biome, ChunkPos, EntityId, Tick};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::info;

/// Why a removal was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullReason {
    SoftCap,
    Density,
    NightCap,
    Overcrowding,
}

impl CullReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SoftCap => "soft cap",
            Self::Density => "density",
            Self::NightCap => "night cap",
            Self::Overcrowding => "overcrowding",
        }
    }
}

/// Planned removals for one herd; computed and consumed within one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CullPlan {
    pub removals: usize,
    pub reason: CullReason,
}

/// Running population counts for one species in one world. Culls decrement
/// them in place so later checks in the same pass see the change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationCounts {
    pub total: usize,
    by_biome: HashMap<Biome, usize>,
    by_chunk: HashMap<ChunkPos, usize>,
    placement: HashMap<EntityId, (Biome, ChunkPos)>,
}

impl PopulationCounts {
    /// Count every valid creature in `creatures`.
    pub fn tally(world: &dyn WorldQuery, creatures: &[EntitySnapshot]) -> Self {
        let mut counts = Self::default();
        for creature in creatures.iter().filter(|c| c.is_valid()) {
            let biome = world.biome(creature.position);
            let chunk = creature.position.chunk();
            counts.total += 1;
            *counts.by_biome.entry(biome.clone()).or_default() += 1;
            *counts.by_chunk.entry(chunk).or_default() += 1;
            counts.placement.insert(creature.id, (biome, chunk));
        }
        counts
    }

    #[must_use]
    pub fn biome(&self, biome: &Biome) -> usize {
        self.by_biome.get(biome).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn chunk(&self, chunk: ChunkPos) -> usize {
        self.by_chunk.get(&chunk).copied().unwrap_or(0)
    }

    /// Biome and chunk a counted creature was tallied in.
    #[must_use]
    pub fn placement(&self, id: EntityId) -> Option<&(Biome, ChunkPos)> {
        self.placement.get(&id)
    }

    /// Population of the biome holding `id`.
    #[must_use]
    pub fn biome_of(&self, id: EntityId) -> usize {
        self.placement
            .get(&id)
            .map_or(0, |(biome, _)| self.biome(biome))
    }

    /// Largest overshoot of the per-biome or per-chunk cap around `id`.
    #[must_use]
    pub fn excess_around(&self, id: EntityId, species: &SpeciesConfig) -> usize {
        let Some((biome, chunk)) = self.placement.get(&id) else {
            return 0;
        };
        let over = |count: usize, cap: usize| {
            if cap == 0 {
                0
            } else {
                count.saturating_sub(cap)
            }
        };
        over(self.biome(biome), species.soft_cap_per_biome)
            .max(over(self.chunk(*chunk), species.soft_cap_per_chunk))
    }

    /// Remove one counted creature from every tally.
    pub fn record_removal(&mut self, id: EntityId) {
        let Some((biome, chunk)) = self.placement.remove(&id) else {
            return;
        };
        self.total = self.total.saturating_sub(1);
        if let Some(count) = self.by_biome.get_mut(&biome) {
            *count = count.saturating_sub(1);
        }
        if let Some(count) = self.by_chunk.get_mut(&chunk) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Removals issued by one controller pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullTally {
    pub soft_cap: usize,
    pub density: usize,
    pub night_cap: usize,
    pub drowned: usize,
    pub removed_invalid: usize,
}

/// Population control context for one (world, species) pair on one tick.
pub struct PopulationController<'a, R: Rng + ?Sized> {
    pub world: &'a mut dyn WorldQuery,
    pub species: &'a SpeciesConfig,
    pub rng: &'a mut R,
    pub now: Tick,
    pub notices: bool,
}

impl<R: Rng + ?Sized> PopulationController<'_, R> {
    /// Soft cap first; the density throttle only when no soft-cap cull happened.
    ///
    /// `members` are the herd's currently valid members; `invalid` are member
    /// ids that no longer resolve to a live creature and are removed outright.
    pub fn control_herd(
        &mut self,
        cache: &mut HerdCache,
        counts: &mut PopulationCounts,
        herd: &Herd,
        members: &[EntitySnapshot],
        invalid: &[EntityId],
    ) -> CullTally {
        let mut tally = CullTally::default();
        for id in invalid {
            if self.world.remove(*id) {
                tally.removed_invalid += 1;
            }
            counts.record_removal(*id);
            cache.forget(*id);
        }
        if !members.iter().any(|m| m.id == herd.leader) {
            return tally;
        }

        if let Some(plan) = self.soft_cap_plan(cache, counts, herd.leader) {
            tally.soft_cap = self.cull(cache, counts, members, herd.leader, plan, true);
            if tally.soft_cap > 0 {
                cache.last_cull.insert(herd.leader, self.now);
                return tally;
            }
        }

        if let Some(plan) = self.density_plan(members.len()) {
            tally.density = self.cull(cache, counts, members, herd.leader, plan, false);
        }
        tally
    }

    /// Removals owed to the soft caps around `leader`, if its cooldown allows.
    pub fn soft_cap_plan(
        &self,
        cache: &HerdCache,
        counts: &PopulationCounts,
        leader: EntityId,
    ) -> Option<CullPlan> {
        let excess = counts.excess_around(leader, self.species);
        if excess == 0 {
            return None;
        }
        if cache
            .last_cull
            .get(&leader)
            .is_some_and(|last| self.now.since(*last) < self.species.cull_cooldown_ticks)
        {
            return None;
        }
        Some(CullPlan {
            removals: excess.min(self.species.overcap_removals_per_interval),
            reason: CullReason::SoftCap,
        })
    }

    /// One removal with probability `min(max, excess * per_member)`.
    pub fn density_plan(&mut self, herd_size: usize) -> Option<CullPlan> {
        let threshold = self.species.density_threshold;
        if threshold == 0 || herd_size <= threshold {
            return None;
        }
        let excess = (herd_size - threshold) as f64;
        let chance = (excess * self.species.density_chance_per_member)
            .min(self.species.density_max_chance)
            .clamp(0.0, 1.0);
        self.rng.random_bool(chance).then_some(CullPlan {
            removals: 1,
            reason: CullReason::Density,
        })
    }

    /// Soft-kill up to `plan.removals` members: adults before juveniles, the
    /// leader only as a last resort. Never drops the herd below
    /// `min_herd_size` or a biome below `min_biome_population`.
    fn cull(
        &mut self,
        cache: &mut HerdCache,
        counts: &mut PopulationCounts,
        members: &[EntitySnapshot],
        leader: EntityId,
        plan: CullPlan,
        leader_last_resort: bool,
    ) -> usize {
        let mut adults = Vec::new();
        let mut juveniles = Vec::new();
        for member in members {
            if member.id == leader || member.persistent {
                continue;
            }
            if member.adult {
                adults.push(member.id);
            } else {
                juveniles.push(member.id);
            }
        }
        adults.shuffle(self.rng);
        juveniles.shuffle(self.rng);
        let mut candidates = adults;
        candidates.extend(juveniles);

        let mut remaining = members.len();
        let mut removed = 0;
        let mut kept = 0;
        for id in candidates {
            if removed >= plan.removals || remaining <= self.species.min_herd_size {
                break;
            }
            if self.try_cull(cache, counts, id) {
                removed += 1;
                remaining -= 1;
            } else {
                kept += 1;
            }
        }

        // The leader goes only once every other candidate is gone.
        let leader_mortal = members
            .iter()
            .any(|member| member.id == leader && !member.persistent);
        if leader_last_resort
            && leader_mortal
            && kept == 0
            && removed < plan.removals
            && remaining > self.species.min_herd_size
            && self.try_cull(cache, counts, leader)
        {
            removed += 1;
        }

        if removed > 0 && self.notices {
            info!(
                target: "herds::notice",
                species = %cache.species,
                leader = %leader,
                removed,
                reason = plan.reason.as_str(),
                "culled herd members"
            );
        }
        removed
    }

    /// Soft-kill one member unless that would take its biome under the floor.
    fn try_cull(
        &mut self,
        cache: &mut HerdCache,
        counts: &mut PopulationCounts,
        id: EntityId,
    ) -> bool {
        if counts.biome_of(id) <= self.species.min_biome_population {
            return false;
        }
        if !self.world.soft_kill(id) {
            return false;
        }
        counts.record_removal(id);
        cache.forget(id);
        true
    }

    /// Soft-kill random non-leader members while the herd outnumbers the
    /// standable ground columns around its centre. Never goes below
    /// `min_herd_size`; a herd on unknown terrain (no columns) is left alone.
    pub fn cull_over_capacity(
        &mut self,
        cache: &mut HerdCache,
        counts: &mut PopulationCounts,
        herd: &Herd,
        members: &[EntitySnapshot],
    ) -> usize {
        let capacity = herd_capacity(&*self.world, self.species, herd.cluster.center);
        if capacity == 0 || members.len() <= capacity {
            return 0;
        }
        let floor = capacity.max(self.species.min_herd_size);
        let mut candidates: Vec<EntityId> = members
            .iter()
            .filter(|member| member.id != herd.leader && !member.persistent)
            .map(|member| member.id)
            .collect();
        candidates.shuffle(self.rng);

        let mut remaining = members.len();
        let mut removed = 0;
        for id in candidates {
            if remaining <= floor {
                break;
            }
            if self.try_cull(cache, counts, id) {
                removed += 1;
                remaining -= 1;
            }
        }

        if removed > 0 && self.notices {
            info!(
                target: "herds::notice",
                species = %cache.species,
                leader = %herd.leader,
                removed,
                capacity,
                reason = CullReason::Overcrowding.as_str(),
                "culled herd members"
            );
        }
        removed
    }

    /// Soft-kill random non-leader members of oversized herds until the
    /// species total is back at `herd_total_cap`.
    pub fn night_cap(
        &mut self,
        cache: &mut HerdCache,
        counts: &mut PopulationCounts,
        herds: &[(Herd, Vec<EntitySnapshot>)],
    ) -> usize {
        let cap = self.species.herd_total_cap;
        if cap == 0 || counts.total <= cap {
            return 0;
        }
        let mut order: Vec<usize> = (0..herds.len()).collect();
        order.shuffle(self.rng);

        let mut removed = 0;
        for idx in order {
            let (herd, members) = &herds[idx];
            if members.len() <= self.species.herd_target_size {
                continue;
            }
            let mut candidates: Vec<EntityId> = members
                .iter()
                .filter(|member| member.id != herd.leader && !member.persistent)
                .map(|member| member.id)
                .collect();
            candidates.shuffle(self.rng);
            let mut remaining = members.len();
            for id in candidates {
                if counts.total <= cap || remaining <= self.species.min_herd_size {
                    break;
                }
                if self.world.soft_kill(id) {
                    removed += 1;
                    remaining -= 1;
                    counts.record_removal(id);
                    cache.forget(id);
                }
            }
            if counts.total <= cap {
                break;
            }
        }

        if removed > 0 && self.notices {
            info!(
                target: "herds::notice",
                species = %cache.species,
                removed,
                reason = CullReason::NightCap.as_str(),
                "culled herd members"
            );
        }
        removed
    }

    /// Track deep-water exposure and remove creatures submerged for too long.
    pub fn drowning(
        &mut self,
        cache: &mut HerdCache,
        counts: &mut PopulationCounts,
        creatures: &[EntitySnapshot],
    ) -> usize {
        let limit = self.species.drowning_ticks;
        if limit == 0 {
            return 0;
        }
        let mut removed = 0;
        for creature in creatures {
            if !creature.is_valid() || !in_deep_water(&*self.world, creature) {
                cache.drowning_since.remove(&creature.id);
                continue;
            }
            let since = *cache.drowning_since.entry(creature.id).or_insert(self.now);
            if self.now.since(since) < limit {
                continue;
            }
            cache.drowning_since.remove(&creature.id);
            if creature.persistent {
                continue;
            }
            if self.world.remove(creature.id) {
                removed += 1;
                counts.record_removal(creature.id);
                cache.forget(creature.id);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::HerdCluster;
    use crate::sandbox::SandboxWorld;
    use crate::{EntityKind, Material, Position, WorldId};
    use rand::{SeedableRng, rngs::SmallRng};

    fn cow() -> EntityKind {
        EntityKind::from_static("cow")
    }

    struct Fixture {
        world: SandboxWorld,
        cache: HerdCache,
        rng: SmallRng,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                world: SandboxWorld::new(WorldId(0)),
                cache: HerdCache::new(WorldId(0), cow()),
                rng: SmallRng::seed_from_u64(77),
            }
        }

        /// A herd of `size` creatures packed into chunk (0, 0); the first leads.
        fn herd(&mut self, size: usize) -> Herd {
            let members: Vec<EntityId> = (0..size)
                .map(|i| {
                    let x = 0.5 + (i % 8) as f64;
                    let z = 0.5 + (i / 8) as f64;
                    self.world.add_creature(&cow(), Position::new(x, 65.0, z))
                })
                .collect();
            Herd {
                leader: members[0],
                cluster: HerdCluster {
                    members,
                    center: Position::new(4.0, 65.0, 2.0),
                },
            }
        }

        fn snapshots(&self, herd: &Herd) -> Vec<EntitySnapshot> {
            herd.cluster
                .members
                .iter()
                .filter_map(|id| self.world.entity(*id))
                .filter(EntitySnapshot::is_valid)
                .collect()
        }

        fn counts(&self) -> PopulationCounts {
            let creatures = self.world.creatures(&cow()).expect("creatures");
            PopulationCounts::tally(&self.world, &creatures)
        }

        fn run(
            &mut self,
            species: &SpeciesConfig,
            now: u64,
            counts: &mut PopulationCounts,
            herd: &Herd,
        ) -> CullTally {
            let members = self.snapshots(herd);
            let mut controller = PopulationController {
                world: &mut self.world,
                species,
                rng: &mut self.rng,
                now: Tick(now),
                notices: true,
            };
            controller.control_herd(&mut self.cache, counts, herd, &members, &[])
        }
    }

    fn capped(per_chunk: usize, removals: usize) -> SpeciesConfig {
        SpeciesConfig {
            soft_cap_per_chunk: per_chunk,
            soft_cap_per_biome: 0,
            overcap_removals_per_interval: removals,
            density_threshold: 0,
            ..SpeciesConfig::default()
        }
    }

    #[test]
    fn soft_cap_removes_exactly_the_configured_count() {
        let mut fx = Fixture::new();
        let herd = fx.herd(30);
        let species = capped(20, 3);
        let mut counts = fx.counts();
        assert_eq!(counts.chunk(ChunkPos::new(0, 0)), 30);

        let tally = fx.run(&species, 1_000, &mut counts, &herd);
        assert_eq!(tally.soft_cap, 3);
        assert_eq!(counts.chunk(ChunkPos::new(0, 0)), 27);
        assert_eq!(fx.world.soft_killed().len(), 3);
        assert!(!fx.world.soft_killed().contains(&herd.leader));
        assert_eq!(fx.cache.last_cull.get(&herd.leader), Some(&Tick(1_000)));
    }

    #[test]
    fn cull_cooldown_blocks_repeat_culls() {
        let mut fx = Fixture::new();
        let herd = fx.herd(30);
        let species = capped(20, 3);
        let mut counts = fx.counts();
        fx.run(&species, 1_000, &mut counts, &herd);
        let tally = fx.run(&species, 1_000 + species.cull_cooldown_ticks - 1, &mut counts, &herd);
        assert_eq!(tally.soft_cap, 0);
        let tally = fx.run(&species, 1_000 + species.cull_cooldown_ticks, &mut counts, &herd);
        assert_eq!(tally.soft_cap, 3);
    }

    #[test]
    fn removals_never_exceed_the_overshoot() {
        let mut fx = Fixture::new();
        let herd = fx.herd(12);
        let species = capped(10, 5);
        let mut counts = fx.counts();
        assert_eq!(fx.run(&species, 0, &mut counts, &herd).soft_cap, 2);
    }

    #[test]
    fn floors_hold_across_repeated_cycles() {
        let mut fx = Fixture::new();
        let herd = fx.herd(9);
        let species = SpeciesConfig {
            min_herd_size: 4,
            min_biome_population: 2,
            cull_cooldown_ticks: 1,
            ..capped(1, 3)
        };
        let mut counts = fx.counts();
        for cycle in 0..10 {
            fx.run(&species, cycle * 10, &mut counts, &herd);
            assert!(fx.snapshots(&herd).len() >= species.min_herd_size);
        }
        assert_eq!(fx.snapshots(&herd).len(), species.min_herd_size);

        let mut fx = Fixture::new();
        let herd = fx.herd(9);
        let species = SpeciesConfig {
            min_herd_size: 1,
            min_biome_population: 6,
            cull_cooldown_ticks: 1,
            ..capped(1, 3)
        };
        let mut counts = fx.counts();
        for cycle in 0..10 {
            fx.run(&species, cycle * 10, &mut counts, &herd);
        }
        assert_eq!(counts.total, 6);
        assert_eq!(fx.world.population(&cow()), 6);
    }

    #[test]
    fn adults_go_before_juveniles_and_persistent_creatures_stay() {
        let mut fx = Fixture::new();
        let herd = fx.herd(6);
        let members = &herd.cluster.members;
        fx.world.entity_mut(members[1]).expect("m").adult = false;
        fx.world.entity_mut(members[2]).expect("m").adult = false;
        fx.world.entity_mut(members[3]).expect("m").persistent = true;
        let species = SpeciesConfig {
            min_herd_size: 1,
            min_biome_population: 0,
            ..capped(1, 2)
        };
        let mut counts = fx.counts();
        assert_eq!(fx.run(&species, 0, &mut counts, &herd).soft_cap, 2);
        let mut killed = fx.world.soft_killed().to_vec();
        killed.sort();
        let mut adults = vec![members[4], members[5]];
        adults.sort();
        assert_eq!(killed, adults);
    }

    #[test]
    fn leader_is_culled_only_as_last_resort() {
        let mut fx = Fixture::new();
        let herd = fx.herd(3);
        let members = &herd.cluster.members;
        fx.world.entity_mut(members[1]).expect("m").persistent = true;
        fx.world.entity_mut(members[2]).expect("m").persistent = true;
        let species = SpeciesConfig {
            min_herd_size: 1,
            min_biome_population: 0,
            ..capped(1, 2)
        };
        let mut counts = fx.counts();
        assert_eq!(fx.run(&species, 0, &mut counts, &herd).soft_cap, 1);
        assert_eq!(fx.world.soft_killed(), &[herd.leader]);
    }

    #[test]
    fn leader_stays_while_a_follower_could_not_be_culled() {
        let mut fx = Fixture::new();
        let herd = fx.herd(3);
        let members = herd.cluster.members.clone();
        fx.world.entity_mut(members[1]).expect("m").persistent = true;
        let mut counts = fx.counts();
        let roster = fx.snapshots(&herd);
        assert!(fx.world.remove(members[2]));

        let species = SpeciesConfig {
            min_herd_size: 1,
            min_biome_population: 0,
            ..capped(1, 2)
        };
        let mut controller = PopulationController {
            world: &mut fx.world,
            species: &species,
            rng: &mut fx.rng,
            now: Tick(0),
            notices: false,
        };
        let tally = controller.control_herd(&mut fx.cache, &mut counts, &herd, &roster, &[]);
        assert_eq!(tally.soft_cap, 0);
        assert!(fx.world.soft_killed().is_empty());
        assert!(fx.world.entity(herd.leader).is_some_and(|e| e.is_valid()));
    }

    #[test]
    fn density_throttle_culls_one_non_leader() {
        let mut fx = Fixture::new();
        let herd = fx.herd(20);
        let species = SpeciesConfig {
            soft_cap_per_chunk: 0,
            soft_cap_per_biome: 0,
            density_threshold: 10,
            density_chance_per_member: 1.0,
            density_max_chance: 1.0,
            ..SpeciesConfig::default()
        };
        let mut counts = fx.counts();
        let tally = fx.run(&species, 0, &mut counts, &herd);
        assert_eq!(tally.density, 1);
        assert_eq!(tally.soft_cap, 0);
        assert_ne!(fx.world.soft_killed()[0], herd.leader);
        assert_eq!(counts.total, 19);
    }

    #[test]
    fn soft_cap_takes_priority_over_density() {
        let mut fx = Fixture::new();
        let herd = fx.herd(20);
        let species = SpeciesConfig {
            soft_cap_per_chunk: 18,
            soft_cap_per_biome: 0,
            overcap_removals_per_interval: 5,
            density_threshold: 10,
            density_chance_per_member: 1.0,
            density_max_chance: 1.0,
            ..SpeciesConfig::default()
        };
        let mut counts = fx.counts();
        let tally = fx.run(&species, 0, &mut counts, &herd);
        assert_eq!((tally.soft_cap, tally.density), (2, 0));
    }

    #[test]
    fn stale_members_are_removed_outright() {
        let mut fx = Fixture::new();
        let herd = fx.herd(4);
        let gone = herd.cluster.members[3];
        fx.world.entity_mut(gone).expect("m").health = 0.0;
        let members = fx.snapshots(&herd);
        let mut counts = fx.counts();
        let species = SpeciesConfig::default();
        let mut controller = PopulationController {
            world: &mut fx.world,
            species: &species,
            rng: &mut fx.rng,
            now: Tick(0),
            notices: false,
        };
        let tally = controller.control_herd(&mut fx.cache, &mut counts, &herd, &members, &[gone]);
        assert_eq!(tally.removed_invalid, 1);
        assert_eq!(fx.world.removed(), &[gone]);
    }

    #[test]
    fn night_cap_trims_oversized_herds_to_the_total() {
        let mut fx = Fixture::new();
        let big = fx.herd(10);
        let species = SpeciesConfig {
            herd_total_cap: 6,
            herd_target_size: 4,
            min_herd_size: 2,
            ..SpeciesConfig::default()
        };
        let mut counts = fx.counts();
        let herds = vec![(big.clone(), fx.snapshots(&big))];
        let mut controller = PopulationController {
            world: &mut fx.world,
            species: &species,
            rng: &mut fx.rng,
            now: Tick(0),
            notices: false,
        };
        assert_eq!(controller.night_cap(&mut fx.cache, &mut counts, &herds), 4);
        assert_eq!(counts.total, 6);
        assert!(!fx.world.soft_killed().contains(&big.leader));
    }

    /// Eight cows on a dry 2x2 stone patch in the middle of a lake.
    fn patch_herd(fx: &mut Fixture) -> Herd {
        fx.world.set_ground_area((0, 0), (1, 1), 70, Material::Stone);
        fx.world.flood((-20, -20), (20, 20), 65);
        let members: Vec<EntityId> = (0..8)
            .map(|i: i32| {
                let at = Position::new(f64::from(i % 2) + 0.5, 71.0, f64::from((i / 2) % 2) + 0.5);
                fx.world.add_creature(&cow(), at)
            })
            .collect();
        Herd {
            leader: members[0],
            cluster: HerdCluster {
                members,
                center: Position::new(1.0, 71.0, 1.0),
            },
        }
    }

    fn trim(fx: &mut Fixture, herd: &Herd, species: &SpeciesConfig) -> usize {
        let mut counts = fx.counts();
        let roster = fx.snapshots(herd);
        let mut controller = PopulationController {
            world: &mut fx.world,
            species,
            rng: &mut fx.rng,
            now: Tick(0),
            notices: true,
        };
        controller.cull_over_capacity(&mut fx.cache, &mut counts, herd, &roster)
    }

    #[test]
    fn herd_on_a_small_patch_is_trimmed_to_its_capacity() {
        let mut fx = Fixture::new();
        let herd = patch_herd(&mut fx);
        let species = SpeciesConfig {
            min_biome_population: 0,
            ..SpeciesConfig::default()
        };
        assert_eq!(trim(&mut fx, &herd, &species), 4);
        assert_eq!(fx.snapshots(&herd).len(), 4);
        assert!(!fx.world.soft_killed().contains(&herd.leader));
        assert_eq!(trim(&mut fx, &herd, &species), 0);
    }

    #[test]
    fn capacity_trim_respects_the_herd_floor_and_persistent_members() {
        let mut fx = Fixture::new();
        let herd = patch_herd(&mut fx);
        let keep = herd.cluster.members[1];
        fx.world.entity_mut(keep).expect("m").persistent = true;
        let species = SpeciesConfig {
            min_biome_population: 0,
            min_herd_size: 6,
            ..SpeciesConfig::default()
        };
        assert_eq!(trim(&mut fx, &herd, &species), 2);
        assert!(!fx.world.soft_killed().contains(&keep));
        assert_eq!(fx.snapshots(&herd).len(), 6);
    }

    #[test]
    fn drowning_removes_after_the_limit() {
        let mut fx = Fixture::new();
        fx.world.set_ground_area((-4, -4), (4, 4), 58, Material::Sand);
        fx.world.flood((-4, -4), (4, 4), 63);
        let swimmer = fx.world.add_creature(&cow(), Position::new(0.5, 60.0, 0.5));
        let named = fx.world.add_creature(&cow(), Position::new(1.5, 60.0, 0.5));
        fx.world.entity_mut(named).expect("named").persistent = true;
        let species = SpeciesConfig {
            drowning_ticks: 100,
            ..SpeciesConfig::default()
        };
        let mut counts = fx.counts();
        for now in [0, 50, 99, 100] {
            let creatures = fx.world.creatures(&cow()).expect("creatures");
            let mut controller = PopulationController {
                world: &mut fx.world,
                species: &species,
                rng: &mut fx.rng,
                now: Tick(now),
                notices: false,
            };
            let removed = controller.drowning(&mut fx.cache, &mut counts, &creatures);
            assert_eq!(removed, usize::from(now == 100), "tick {now}");
        }
        assert!(fx.world.entity(swimmer).is_none());
        assert!(fx.world.entity(named).is_some());
    }
}
