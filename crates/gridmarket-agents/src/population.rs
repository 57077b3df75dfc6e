//! Seeded population construction.
//!
//! Agents are created once from a [`PopulationSpec`] and a `SmallRng`
//! seeded with the run seed, so two runs with the same configuration spawn
//! byte-identical populations. Numeric ranges follow the reference market:
//! household balances of 1000-2000 with needs of 80-150 units, industrial
//! balances of 20000-50000, producer capacities of 500-1000 at base costs
//! of 20-50, utility storage of 400-1500.
//!
//! Structural validation fails fast: a market without at least one
//! consumer, one producer, and one utility never starts.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use gridmarket_types::{
    AdjustmentRule, Agent, AgentCommon, AgentId, AgentKind, Consumer, ConsumerProfile,
    EnergySource, History, MarginalCost, Persona, PolicyLevers, Producer, Prosumer, Regulator,
    Utility,
};

use crate::table::AgentTable;

/// Errors that abort population construction.
#[derive(Debug, thiserror::Error)]
pub enum PopulationError {
    /// A required agent variant has a zero population count.
    #[error("population requires at least one {kind}, got zero")]
    MissingVariant {
        /// The missing variant.
        kind: AgentKind,
    },
}

/// Everything needed to spawn a population.
#[derive(Debug, Clone)]
pub struct PopulationSpec {
    /// Number of consumers; must be at least 1.
    pub consumers: u32,
    /// Number of prosumers; may be 0.
    pub prosumers: u32,
    /// Number of producers; must be at least 1.
    pub producers: u32,
    /// Number of utilities; must be at least 1.
    pub utilities: u32,
    /// Run seed.
    pub seed: u64,
    /// Initial price anchor for ask/resale prices.
    pub initial_price: Decimal,
    /// Initial carbon tax lever.
    pub carbon_tax: Decimal,
    /// Initial renewable incentive lever.
    pub renewable_incentive: Decimal,
    /// Regulator adjustment-rule parameters.
    pub rule: AdjustmentRule,
    /// Fraction of producers spawned with a renewable source, in `0..=1`.
    pub producer_renewable_share: Decimal,
    /// Length of each agent's observation window.
    pub history_window: usize,
    /// Persona labels cycled across agents.
    pub personas: Vec<String>,
}

/// Renewable sources cycled across renewable producers and prosumers.
const RENEWABLE_SOURCES: [EnergySource; 3] =
    [EnergySource::Solar, EnergySource::Wind, EnergySource::Hydro];

/// Conventional sources cycled across the remaining producers.
const CONVENTIONAL_SOURCES: [EnergySource; 4] = [
    EnergySource::Gas,
    EnergySource::Coal,
    EnergySource::Oil,
    EnergySource::Nuclear,
];

/// Spawn the full population for a run.
///
/// # Errors
///
/// Returns [`PopulationError::MissingVariant`] if the spec has zero
/// consumers, producers, or utilities.
pub fn spawn_population(spec: &PopulationSpec) -> Result<AgentTable, PopulationError> {
    validate(spec)?;

    let mut rng = SmallRng::seed_from_u64(spec.seed);
    let mut agents: Vec<Agent> = Vec::new();
    let mut persona_cursor = 0usize;

    for index in 0..spec.consumers {
        agents.push(spawn_consumer(spec, index, &mut rng, &mut persona_cursor));
    }
    for index in 0..spec.prosumers {
        agents.push(spawn_prosumer(spec, index, &mut rng, &mut persona_cursor));
    }
    for index in 0..spec.producers {
        agents.push(spawn_producer(spec, index, &mut rng, &mut persona_cursor));
    }
    for index in 0..spec.utilities {
        agents.push(spawn_utility(spec, index, &mut rng, &mut persona_cursor));
    }
    agents.push(spawn_regulator(spec));

    Ok(AgentTable::new(agents))
}

fn validate(spec: &PopulationSpec) -> Result<(), PopulationError> {
    for (count, kind) in [
        (spec.consumers, AgentKind::Consumer),
        (spec.producers, AgentKind::Producer),
        (spec.utilities, AgentKind::Utility),
    ] {
        if count == 0 {
            return Err(PopulationError::MissingVariant { kind });
        }
    }
    Ok(())
}

fn next_persona(spec: &PopulationSpec, cursor: &mut usize) -> Persona {
    if spec.personas.is_empty() {
        return Persona::default();
    }
    let label = spec
        .personas
        .get(*cursor % spec.personas.len())
        .cloned()
        .unwrap_or_default();
    *cursor = cursor.saturating_add(1);
    Persona(label)
}

fn common(
    spec: &PopulationSpec,
    kind: AgentKind,
    index: u32,
    balance: Decimal,
    cursor: &mut usize,
) -> AgentCommon {
    AgentCommon {
        id: AgentId::new(kind, index),
        persona: next_persona(spec, cursor),
        balance,
        history: History::new(spec.history_window),
    }
}

fn spawn_consumer(
    spec: &PopulationSpec,
    index: u32,
    rng: &mut SmallRng,
    cursor: &mut usize,
) -> Agent {
    let balance = Decimal::from(rng.random_range(1000..2000u32));
    let energy_need = Decimal::from(rng.random_range(80..150u32));
    // Each consumer prefers one utility; advisory only.
    let preferred = AgentId::new(AgentKind::Utility, rng.random_range(0..spec.utilities));

    Agent::Consumer(Consumer {
        common: common(spec, AgentKind::Consumer, index, balance, cursor),
        profile: ConsumerProfile {
            energy_need,
            preferred_sellers: vec![preferred],
        },
    })
}

fn spawn_prosumer(
    spec: &PopulationSpec,
    index: u32,
    rng: &mut SmallRng,
    cursor: &mut usize,
) -> Agent {
    let balance = Decimal::from(rng.random_range(1000..2000u32));
    let energy_need = Decimal::from(rng.random_range(80..150u32));
    let capacity = Decimal::from(rng.random_range(50..100u32));
    let storage_capacity = Decimal::from(rng.random_range(10..50u32));
    let source = RENEWABLE_SOURCES[index as usize % RENEWABLE_SOURCES.len()];
    let preferred = AgentId::new(AgentKind::Utility, rng.random_range(0..spec.utilities));

    Agent::Prosumer(Prosumer {
        common: common(spec, AgentKind::Prosumer, index, balance, cursor),
        profile: ConsumerProfile {
            energy_need,
            preferred_sellers: vec![preferred],
        },
        capacity,
        production: Decimal::ZERO,
        storage: Decimal::ZERO,
        storage_capacity,
        ask_price: spec.initial_price,
        source,
        maintenance_rate: Decimal::new(5, 2),
    })
}

fn spawn_producer(
    spec: &PopulationSpec,
    index: u32,
    rng: &mut SmallRng,
    cursor: &mut usize,
) -> Agent {
    let balance = Decimal::from(rng.random_range(20_000..50_000u32));
    let capacity = Decimal::from(rng.random_range(500..1000u32));
    let base_cost = Decimal::from(rng.random_range(20..50u32));

    // The first `renewable_share` of the fleet is renewable, the rest
    // conventional, cycling within each group.
    let renewable_count = (spec.producer_renewable_share
        .clamp(Decimal::ZERO, Decimal::ONE)
        .saturating_mul(Decimal::from(spec.producers)))
    .ceil();
    let source = if Decimal::from(index) < renewable_count {
        RENEWABLE_SOURCES[index as usize % RENEWABLE_SOURCES.len()]
    } else {
        CONVENTIONAL_SOURCES[index as usize % CONVENTIONAL_SOURCES.len()]
    };

    // Cost-plus opening quote: base cost with a 30% margin.
    let ask_price = base_cost.saturating_mul(Decimal::new(13, 1)).round_dp(2);

    Agent::Producer(Producer {
        common: common(spec, AgentKind::Producer, index, balance, cursor),
        capacity,
        output: Decimal::ZERO,
        cost: MarginalCost {
            base: base_cost,
            slope: Decimal::new(1, 2),
        },
        ask_price,
        source,
        invest_yield: Decimal::new(4, 2),
        pending_capacity: Decimal::ZERO,
    })
}

fn spawn_utility(
    spec: &PopulationSpec,
    index: u32,
    rng: &mut SmallRng,
    cursor: &mut usize,
) -> Agent {
    let balance = Decimal::from(rng.random_range(20_000..50_000u32));
    let storage_capacity = Decimal::from(rng.random_range(400..1500u32));
    // Quota drawn from [0, 0.4), matching the reference market.
    let min_renewable_fraction =
        Decimal::from(rng.random_range(0..40u32)).saturating_mul(Decimal::new(1, 2));

    Agent::Utility(Utility {
        common: common(spec, AgentKind::Utility, index, balance, cursor),
        // Half-full working stock so the retail segment is liquid from
        // tick one.
        inventory: storage_capacity.saturating_mul(Decimal::new(5, 1)),
        storage_capacity,
        resale_price: spec.initial_price,
        min_renewable_fraction,
    })
}

fn spawn_regulator(spec: &PopulationSpec) -> Agent {
    Agent::Regulator(Regulator {
        common: AgentCommon {
            id: AgentId::new(AgentKind::Regulator, 0),
            persona: Persona::default(),
            balance: Decimal::ZERO,
            history: History::new(spec.history_window),
        },
        levers: PolicyLevers {
            carbon_tax: spec.carbon_tax,
            renewable_incentive: spec.renewable_incentive,
        },
        rule: spec.rule.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spec() -> PopulationSpec {
        PopulationSpec {
            consumers: 4,
            prosumers: 2,
            producers: 3,
            utilities: 2,
            seed: 42,
            initial_price: Decimal::new(100, 0),
            carbon_tax: Decimal::new(10, 0),
            renewable_incentive: Decimal::new(5, 0),
            rule: AdjustmentRule {
                renewable_target: Decimal::new(3, 1),
                volatility_ceiling: 15.0,
                growth_floor: 0.01,
                max_step: Decimal::new(2, 0),
                gouging_multiple: Decimal::new(15, 1),
                gouging_fine_rate: Decimal::new(2, 0),
            },
            producer_renewable_share: Decimal::new(34, 2),
            history_window: 24,
            personas: vec!["eco_friendly".to_owned(), "profit_driven".to_owned()],
        }
    }

    #[test]
    fn spawns_configured_counts_plus_regulator() {
        let table = spawn_population(&spec()).unwrap();
        assert_eq!(table.consumers().count(), 4);
        assert_eq!(table.prosumers().count(), 2);
        assert_eq!(table.producers().count(), 3);
        assert_eq!(table.utilities().count(), 2);
        assert!(table.regulator().is_some());
        assert_eq!(table.len(), 12);
    }

    #[test]
    fn zero_consumers_fails_fast() {
        let mut bad = spec();
        bad.consumers = 0;
        assert!(matches!(
            spawn_population(&bad),
            Err(PopulationError::MissingVariant {
                kind: AgentKind::Consumer
            })
        ));
    }

    #[test]
    fn zero_prosumers_is_allowed() {
        let mut thin = spec();
        thin.prosumers = 0;
        assert!(spawn_population(&thin).is_ok());
    }

    #[test]
    fn same_seed_spawns_identical_populations() {
        let a = spawn_population(&spec()).unwrap();
        let b = spawn_population(&spec()).unwrap();
        for (left, right) in a.iter().zip(b.iter()) {
            assert_eq!(left, right);
        }
    }

    #[test]
    fn different_seeds_differ() {
        let a = spawn_population(&spec()).unwrap();
        let mut other = spec();
        other.seed = 43;
        let b = spawn_population(&other).unwrap();
        let same = a.iter().zip(b.iter()).all(|(l, r)| l == r);
        assert!(!same);
    }

    #[test]
    fn renewable_share_tags_leading_producers() {
        let table = spawn_population(&spec()).unwrap();
        // ceil(0.34 * 3) = 2 renewable producers.
        let renewable = table.producers().filter(|p| p.source.is_renewable()).count();
        assert_eq!(renewable, 2);
    }

    #[test]
    fn quotas_and_needs_are_within_reference_ranges() {
        let table = spawn_population(&spec()).unwrap();
        for consumer in table.consumers() {
            assert!(consumer.profile.energy_need >= Decimal::from(80u32));
            assert!(consumer.profile.energy_need < Decimal::from(150u32));
        }
        for utility in table.utilities() {
            assert!(utility.min_renewable_fraction >= Decimal::ZERO);
            assert!(utility.min_renewable_fraction < Decimal::new(4, 1));
            assert!(utility.inventory <= utility.storage_capacity);
        }
    }
}
