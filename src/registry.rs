use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::abi::load_abi;
use crate::config::ContractCfg;
use crate::event_decoder::EventDecoder;
use crate::handlers::{build_handler, EventHandler};
use crate::types::Criterion;

/// Everything needed to decode and handle the logs of one watched contract.
#[derive(Clone)]
pub struct ContractBinding {
    pub name: String,
    pub address: Address,
    pub decoder: Arc<EventDecoder>,
    pub handler: Arc<dyn EventHandler>,
    pub criteria: Vec<Criterion>,
}

impl ContractBinding {
    /// `events` narrows the node filter to the named events; `None` watches the whole contract.
    pub fn new(
        name: impl Into<String>,
        address: Address,
        abi: &JsonAbi,
        handler: Arc<dyn EventHandler>,
        events: Option<&[String]>,
    ) -> Result<Self> {
        let name = name.into();
        let decoder = EventDecoder::new(abi);

        let criteria = match events {
            None => vec![Criterion::contract(address)],
            Some(events) => events
                .iter()
                .map(|event_name| {
                    decoder
                        .selector(event_name)
                        .map(|topic0| Criterion::event(address, topic0))
                        .ok_or_else(|| {
                            anyhow!(
                                "Event '{}' not found in ABI of '{}' (or it is anonymous)",
                                event_name,
                                name
                            )
                        })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            name,
            address,
            decoder: Arc::new(decoder),
            handler,
            criteria,
        })
    }
}

/// Immutable address → binding map built once at startup.
pub struct CriteriaRegistry {
    bindings: BTreeMap<Address, ContractBinding>,
}

impl CriteriaRegistry {
    pub fn new(bindings: Vec<ContractBinding>) -> Result<Self> {
        let mut map: BTreeMap<Address, ContractBinding> = BTreeMap::new();
        for binding in bindings {
            if let Some(existing) = map.get(&binding.address) {
                return Err(anyhow!(
                    "Contracts '{}' and '{}' share address {}",
                    existing.name,
                    binding.name,
                    binding.address
                ));
            }
            map.insert(binding.address, binding);
        }

        Ok(Self { bindings: map })
    }

    pub fn from_config(contracts: &[ContractCfg]) -> Result<Self> {
        let mut bindings = Vec::with_capacity(contracts.len());

        for contract in contracts {
            let abi = load_abi(&contract.abi_path)
                .with_context(|| format!("Loading ABI for contract '{}'", contract.name))?;
            let binding = ContractBinding::new(
                contract.name.clone(),
                contract.address,
                &abi,
                build_handler(contract.handler),
                contract.events.as_deref(),
            )?;

            info!(
                contract = %binding.address,
                criteria = binding.criteria.len(),
                events = binding.decoder.regular_events_count(),
                anonymous_events = binding.decoder.anonymous_events_count(),
                "Watching {} ({:?} handler)", binding.name, contract.handler
            );
            bindings.push(binding);
        }

        Self::new(bindings)
    }

    pub fn binding(&self, address: &Address) -> Option<&ContractBinding> {
        self.bindings.get(address)
    }

    /// Union of all bindings' criteria, the node-side filter.
    pub fn criteria(&self) -> Vec<Criterion> {
        self.bindings
            .values()
            .flat_map(|binding| binding.criteria.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
