//! One-to-one alignment of modification matches onto peptide sites.
//!
//! Each request is a modification match that could not stay on its reported
//! site, together with the sites it may be moved to. The alignment is a
//! maximum-cardinality bipartite matching found with augmenting paths.
//! Requests are processed in the order given and each request tries its
//! free candidate site nearest to the reported site, the lower position
//! winning a tie. Only when none is free does it displace an earlier
//! request, which must then move to another of its candidates.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignmentRequest {
    /// Site reported by the search engine
    pub reported: usize,
    /// Sites the match may be moved to
    pub candidates: Vec<usize>,
}

impl AlignmentRequest {
    pub fn new(reported: usize, mut candidates: Vec<usize>) -> Self {
        candidates.sort_by_key(|&site| (site.abs_diff(reported), site));
        candidates.dedup();
        AlignmentRequest {
            reported,
            candidates,
        }
    }
}

/// Corrected site for every request, `None` if no site is left for it
pub fn align(requests: &[AlignmentRequest]) -> Vec<Option<usize>> {
    // site -> index of the request holding it
    let mut owner: BTreeMap<usize, usize> = BTreeMap::new();
    for request in 0..requests.len() {
        let mut visited = BTreeSet::new();
        augment(request, requests, &mut owner, &mut visited);
    }

    let mut corrected = vec![None; requests.len()];
    for (site, request) in owner {
        corrected[request] = Some(site);
    }
    corrected
}

fn augment(
    request: usize,
    requests: &[AlignmentRequest],
    owner: &mut BTreeMap<usize, usize>,
    visited: &mut BTreeSet<usize>,
) -> bool {
    let candidates = &requests[request].candidates;
    if let Some(&site) = candidates
        .iter()
        .find(|site| !visited.contains(*site) && !owner.contains_key(*site))
    {
        visited.insert(site);
        owner.insert(site, request);
        return true;
    }

    for &site in candidates {
        if !visited.insert(site) {
            continue;
        }
        if let Some(holder) = owner.get(&site).copied() {
            if augment(holder, requests, owner, visited) {
                owner.insert(site, request);
                return true;
            }
        }
    }
    false
}
