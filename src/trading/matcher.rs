//! Strategy matching: filter opportunities through a user's strategies.

use crate::models::{Opportunity, Strategy};

/// An opportunity together with the strategy that accepted it. The accepting
/// strategy's limits drive sizing downstream.
#[derive(Debug, Clone)]
pub struct AcceptedOpportunity {
    pub opportunity: Opportunity,
    pub strategy: Strategy,
}

/// Filter `opportunities` down to those at least one active strategy accepts.
///
/// The first accepting strategy wins and no further strategies are consulted
/// for that opportunity; overlapping strategies are never combined. The
/// output is a subsequence of the input: order preserved, no duplicates
/// introduced.
pub fn match_opportunities(
    opportunities: &[Opportunity],
    strategies: &[Strategy],
) -> Vec<AcceptedOpportunity> {
    opportunities
        .iter()
        .filter_map(|opportunity| {
            strategies
                .iter()
                .find(|strategy| strategy.accepts(opportunity))
                .map(|strategy| AcceptedOpportunity {
                    opportunity: opportunity.clone(),
                    strategy: strategy.clone(),
                })
        })
        .collect()
}
