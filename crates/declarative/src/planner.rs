//! Execution planner - orders scenario resources into phases

use crate::resource::{BoxedResource, ServiceRestart};
use crate::scenario::{PackageAction, Scenario};
use crate::types::Phase;

/// A scenario's resources grouped into the fixed convergence phases
pub struct ExecutionPlan {
    /// Send `rehearsal-start` before anything else
    pub rehearsal: bool,
    pub installs: Vec<BoxedResource>,
    pub removals: Vec<BoxedResource>,
    pub copies: Vec<BoxedResource>,
    pub deletions: Vec<BoxedResource>,
}

impl ExecutionPlan {
    /// Create a new empty plan
    pub fn new(rehearsal: bool) -> Self {
        Self {
            rehearsal,
            installs: Vec::new(),
            removals: Vec::new(),
            copies: Vec::new(),
            deletions: Vec::new(),
        }
    }

    /// Phase the scenario. Listing order within the document only matters
    /// inside a phase.
    pub fn from_scenario(scenario: &Scenario, rehearsal: bool) -> Self {
        let mut plan = Self::new(rehearsal);
        for package in &scenario.packages {
            let resource: BoxedResource = Box::new(package.clone());
            match package.action {
                PackageAction::Install => plan.installs.push(resource),
                PackageAction::Remove => plan.removals.push(resource),
            }
        }
        for file in &scenario.files {
            let resource: BoxedResource = Box::new(file.clone());
            if file.is_copy() {
                plan.copies.push(resource);
            } else {
                plan.deletions.push(resource);
            }
        }
        plan
    }

    /// Resources of a phase; restarts are only known while executing.
    pub fn phase(&self, phase: Phase) -> &[BoxedResource] {
        match phase {
            Phase::Install => &self.installs,
            Phase::Remove => &self.removals,
            Phase::Copy => &self.copies,
            Phase::Delete => &self.deletions,
            Phase::Rehearsal | Phase::Restart => &[],
        }
    }

    /// Total number of resources in the plan
    pub fn total_resources(&self) -> usize {
        self.installs.len() + self.removals.len() + self.copies.len() + self.deletions.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.total_resources() == 0
    }

    /// Every service some resource may flag for restart, first-seen order.
    pub fn possible_restarts(&self) -> RestartQueue {
        let mut queue = RestartQueue::default();
        for phase in Phase::ALL {
            for resource in self.phase(phase) {
                queue.extend(resource.restarts());
            }
        }
        queue
    }
}

/// Services awaiting restart: insertion ordered, each name at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartQueue {
    services: Vec<String>,
}

impl RestartQueue {
    /// Add a service unless it is already queued
    pub fn push(&mut self, service: &str) {
        if !self.services.iter().any(|s| s == service) {
            self.services.push(service.to_string());
        }
    }

    pub fn extend(&mut self, services: &[String]) {
        for service in services {
            self.push(service);
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.services
    }

    /// One restart resource per queued service
    pub fn into_resources(self) -> Vec<BoxedResource> {
        self.services
            .into_iter()
            .map(|service| Box::new(ServiceRestart { service }) as BoxedResource)
            .collect()
    }
}
