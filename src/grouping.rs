//! Grouping of tracks by bounding-box intersection.
//!
//! Tracks are partitioned into connected components of the "padded bounding boxes
//! intersect" graph. This is single-linkage clustering with a binary distance:
//! intersecting boxes are at distance 0, disjoint boxes are infinitely far apart.
//!
//! Grouping happens in two phases:
//! 1. [`Grouper::add_member`] drops each track into the first group it touches,
//!    or starts a new group.
//! 2. [`Grouper::merge_groups`] joins groups that became connected through later
//!    additions, until no two groups touch.
//!
//! After grouping, every group gets a [`GroupSummary`] carrying the longitude cell
//! width used to rasterize its members.

use std::collections::HashMap;

use log::{debug, error, info};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;

use crate::config::{SelfPairs, SimilarityConfig};
use crate::geo_utils;
use crate::TrackMetadata;

/// Derived statistics for one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub n_members: usize,
    pub total_distance: f64,
    /// Median of member bounding-box center latitudes
    pub median_lat: f64,
    /// Median of member bounding-box center longitudes
    pub median_long: f64,
    /// Members sharing a filename with an earlier member
    pub n_duplicates: usize,
    /// Longitude cell width (degrees) for rasterizing this group
    pub long_cell_size: f64,
}

/// Totals across all groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverallSummary {
    pub n_groups: usize,
    pub n_duplicates: usize,
}

/// A set of tracks transitively connected by bounding-box intersection.
#[derive(Debug, Clone)]
pub struct Group {
    pub members: Vec<TrackMetadata>,
    summary: Option<GroupSummary>,
}

impl Group {
    pub fn new(members: Vec<TrackMetadata>) -> Self {
        Self {
            members,
            summary: None,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Summary computed at the end of the last merge, if still current.
    pub fn summary(&self) -> Option<&GroupSummary> {
        self.summary.as_ref()
    }

    pub fn add_member(&mut self, member: TrackMetadata) {
        self.members.push(member);
        self.summary = None;
    }

    /// Move all of `other`'s members into this group.
    pub fn absorb(&mut self, other: Group) {
        self.members.extend(other.members);
        self.summary = None;
    }

    /// Whether any member's box intersects `member`'s box.
    pub fn intersects_member(&self, member: &TrackMetadata) -> bool {
        self.members
            .iter()
            .any(|m| m.bounds.intersects(&member.bounds))
    }

    /// Whether any pair of members across the two groups intersects.
    pub fn intersects_group(&self, other: &Group) -> bool {
        other.members.iter().any(|m| self.intersects_member(m))
    }

    /// Compute summary statistics for the current membership.
    pub fn compute_summary(&self, lat_cell_size: f64) -> GroupSummary {
        let center_lats: Vec<f64> = self.members.iter().map(|m| m.bounds.center().0).collect();
        let center_longs: Vec<f64> = self.members.iter().map(|m| m.bounds.center().1).collect();
        let median_lat = geo_utils::median(&center_lats);

        let mut filename_counts: HashMap<&str, usize> = HashMap::new();
        for m in &self.members {
            *filename_counts.entry(m.filename.as_str()).or_insert(0) += 1;
        }

        GroupSummary {
            n_members: self.members.len(),
            total_distance: self.members.iter().map(|m| m.distance).sum(),
            median_lat,
            median_long: geo_utils::median(&center_longs),
            n_duplicates: filename_counts.values().map(|c| c - 1).sum(),
            long_cell_size: geo_utils::longitude_cell_size(lat_cell_size, median_lat),
        }
    }

    /// Pairs of members, with or without the diagonal.
    pub fn pairwise_iter(
        &self,
        self_pairs: SelfPairs,
    ) -> impl Iterator<Item = (&TrackMetadata, &TrackMetadata)> + '_ {
        let n = self.members.len();
        let offset = match self_pairs {
            SelfPairs::Include => 0,
            SelfPairs::Exclude => 1,
        };
        (0..n).flat_map(move |i| {
            ((i + offset)..n).map(move |j| (&self.members[i], &self.members[j]))
        })
    }
}

/// Partitions tracks into groups by bounding-box intersection.
#[derive(Debug, Clone)]
pub struct Grouper {
    groups: Vec<Group>,
    lat_cell_size: f64,
}

impl Grouper {
    pub fn new(config: &SimilarityConfig) -> Self {
        Self {
            groups: Vec::new(),
            lat_cell_size: config.lat_cell_size(),
        }
    }

    /// Group all `metadata`, merging to a fixed point.
    pub fn from_metadata(metadata: Vec<TrackMetadata>, config: &SimilarityConfig) -> Self {
        info!("Grouping {} tracks", metadata.len());
        let mut grouper = Self::new(config);
        for member in metadata {
            grouper.add_member(member);
        }
        debug!("{} groups before merging", grouper.groups.len());

        let mut total_merges = 0;
        loop {
            let merges = grouper.merge_groups();
            total_merges += merges;
            if merges == 0 {
                break;
            }
        }
        debug!("{} merges performed in final merges", total_merges);
        info!("{} groups created", grouper.groups.len());
        grouper
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Insert `member` into the first group it intersects, or a new group.
    pub fn add_member(&mut self, member: TrackMetadata) {
        match self
            .groups
            .iter_mut()
            .find(|g| g.intersects_member(&member))
        {
            Some(group) => group.add_member(member),
            None => self.groups.push(Group::new(vec![member])),
        }
    }

    /// Merge groups that intersect, returning the number of merges made.
    ///
    /// Scans from the current group toward the end, absorbing every later group that
    /// intersects it. The scan index only advances after a pass with no merge, since a
    /// grown group may now reach groups it previously missed. Summaries are refreshed
    /// on return.
    pub fn merge_groups(&mut self) -> usize {
        if self.groups.len() <= 1 {
            self.set_group_summaries();
            return 0;
        }

        let mut group_idx = 0;
        let mut n_merges = 0;
        let mut merge_iter = 0;
        loop {
            merge_iter += 1;
            let mut loop_change = false;
            let mut i = self.groups.len() - 1;
            while i > group_idx {
                if self.groups[group_idx].intersects_group(&self.groups[i]) {
                    let other = self.groups.remove(i);
                    self.groups[group_idx].absorb(other);
                    n_merges += 1;
                    loop_change = true;
                }
                i -= 1;
            }

            if self.groups.len() == 1 {
                debug!("Halting because one group remains");
                break;
            } else if group_idx == self.groups.len() - 1 {
                debug!("Halting because group index has reached the last group");
                break;
            } else if !loop_change {
                group_idx += 1;
            }
        }
        debug!("Made {} merges in {} iterations", n_merges, merge_iter);

        self.set_group_summaries();
        n_merges
    }

    fn set_group_summaries(&mut self) {
        let lat_cell_size = self.lat_cell_size;
        for group in &mut self.groups {
            group.summary = Some(group.compute_summary(lat_cell_size));
        }
    }

    /// Summary for the group at `idx`, computed on demand if stale.
    pub fn group_summary(&self, idx: usize) -> GroupSummary {
        let group = &self.groups[idx];
        match group.summary() {
            Some(summary) => summary.clone(),
            None => group.compute_summary(self.lat_cell_size),
        }
    }

    pub fn group_summaries(&self) -> Vec<GroupSummary> {
        (0..self.groups.len()).map(|i| self.group_summary(i)).collect()
    }

    pub fn group_sizes(&self) -> Vec<usize> {
        self.groups.iter().map(|g| g.len()).collect()
    }

    pub fn overall_summary(&self) -> OverallSummary {
        OverallSummary {
            n_groups: self.groups.len(),
            n_duplicates: self.group_summaries().iter().map(|s| s.n_duplicates).sum(),
        }
    }

    /// Intra-group member pairs across all groups.
    pub fn pairwise_iter(
        &self,
        self_pairs: SelfPairs,
    ) -> impl Iterator<Item = (&TrackMetadata, &TrackMetadata)> + '_ {
        self.groups
            .iter()
            .flat_map(move |g| g.pairwise_iter(self_pairs))
    }

    /// Member pairs drawn from two different groups (each unordered group pair once).
    pub fn inter_group_pairs(&self) -> impl Iterator<Item = (&TrackMetadata, &TrackMetadata)> + '_ {
        let n = self.groups.len();
        (0..n).flat_map(move |g1| {
            ((g1 + 1)..n).flat_map(move |g2| {
                self.groups[g1].members.iter().flat_map(move |m1| {
                    self.groups[g2].members.iter().map(move |m2| (m1, m2))
                })
            })
        })
    }

    /// Check that no member box intersects a member box of another group.
    ///
    /// Returns the offending filename pairs; empty when the partition is sound.
    pub fn verify_disjoint(&self) -> Vec<(String, String)> {
        let entries: Vec<GroupedEnvelope> = self
            .groups
            .iter()
            .enumerate()
            .flat_map(|(group, g)| {
                g.members
                    .iter()
                    .enumerate()
                    .map(move |(member, m)| GroupedEnvelope {
                        group,
                        member,
                        envelope: m.envelope(),
                    })
            })
            .collect();
        let rtree = RTree::bulk_load(entries);

        let mut violations = Vec::new();
        for (group, g) in self.groups.iter().enumerate() {
            for member in &g.members {
                let hits = rtree
                    .locate_in_envelope_intersecting(&member.envelope())
                    .filter(|e| e.group > group);
                for hit in hits {
                    let other = &self.groups[hit.group].members[hit.member];
                    violations.push((member.filename.clone(), other.filename.clone()));
                }
            }
        }

        if !violations.is_empty() {
            error!(
                "{} bounding-box intersections span different groups",
                violations.len()
            );
        }
        violations
    }
}

/// Member envelope tagged with its group index, for the disjointness check.
#[derive(Debug, Clone)]
struct GroupedEnvelope {
    group: usize,
    member: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for GroupedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn member(name: &str, lat: (f64, f64), lng: (f64, f64), distance: f64) -> TrackMetadata {
        TrackMetadata {
            index: 0,
            filename: name.to_string(),
            bounds: BoundingBox {
                min_lat: lat.0,
                max_lat: lat.1,
                min_lng: lng.0,
                max_lng: lng.1,
            },
            distance,
            median_lat: (lat.0 + lat.1) / 2.0,
            cosine_lat: 1.0,
            start_time: None,
        }
    }

    /// Six boxes: a and b nest, e and f bridge a to c, d stands alone.
    fn sample_members() -> Vec<TrackMetadata> {
        vec![
            member("a", (0.0, 1.0), (0.0, 1.0), 3.0),
            member("b", (0.1, 0.9), (0.1, 0.9), 4.0),
            member("c", (2.0, 3.0), (4.0, 5.0), 100.0),
            member("d", (-1.0, 2.0), (6.0, 7.0), 20.0),
            member("e", (2.0, 3.0), (2.0, 3.0), 50.0),
            member("f", (0.5, 4.0), (0.5, 4.0), 200.0),
        ]
    }

    fn partition(grouper: &Grouper) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = grouper
            .groups()
            .iter()
            .map(|g| {
                let mut names: Vec<String> = g.members.iter().map(|m| m.filename.clone()).collect();
                names.sort();
                names
            })
            .collect();
        groups.sort();
        groups
    }

    #[test]
    fn test_add_member_first_fit() {
        let mut grouper = Grouper::new(&SimilarityConfig::default());
        for m in sample_members() {
            grouper.add_member(m);
        }
        // a+b+f, c, d, e before merging
        assert_eq!(grouper.len(), 4);
        assert_eq!(grouper.group_sizes(), vec![3, 1, 1, 1]);
    }

    #[test]
    fn test_merge_groups_to_fixed_point() {
        let grouper = Grouper::from_metadata(sample_members(), &SimilarityConfig::default());
        assert_eq!(
            partition(&grouper),
            vec![
                vec!["a", "b", "c", "e", "f"],
                vec!["d"],
            ]
        );
        assert!(grouper.verify_disjoint().is_empty());
    }

    #[test]
    fn test_merge_returns_count() {
        let mut grouper = Grouper::new(&SimilarityConfig::default());
        for m in sample_members() {
            grouper.add_member(m);
        }
        assert_eq!(grouper.merge_groups(), 2);
        assert_eq!(grouper.merge_groups(), 0);
    }

    #[test]
    fn test_merge_single_group() {
        let mut grouper = Grouper::new(&SimilarityConfig::default());
        grouper.add_member(member("a", (0.0, 1.0), (0.0, 1.0), 1.0));
        assert_eq!(grouper.merge_groups(), 0);
        assert!(grouper.groups()[0].summary().is_some());
    }

    #[test]
    fn test_group_summary() {
        let mut grouper = Grouper::new(&SimilarityConfig::default());
        grouper.add_member(member("a", (0.0, 1.0), (0.0, 1.0), 3.0));
        grouper.add_member(member("a", (0.0, 1.0), (0.0, 1.0), 4.0));
        grouper.add_member(member("b", (0.0, 2.0), (0.0, 2.0), 5.0));
        grouper.merge_groups();

        let summary = grouper.group_summary(0);
        assert_eq!(summary.n_members, 3);
        assert_eq!(summary.total_distance, 12.0);
        assert_eq!(summary.median_lat, 0.5);
        assert_eq!(summary.median_long, 0.5);
        assert_eq!(summary.n_duplicates, 1);
        assert!(summary.long_cell_size >= SimilarityConfig::default().lat_cell_size());
        assert_eq!(
            grouper.overall_summary(),
            OverallSummary {
                n_groups: 1,
                n_duplicates: 1
            }
        );
    }

    #[test]
    fn test_pairwise_iter_self_pairs() {
        let group = Group::new(vec![
            member("a", (0.0, 1.0), (0.0, 1.0), 1.0),
            member("b", (0.0, 1.0), (0.0, 1.0), 1.0),
            member("c", (0.0, 1.0), (0.0, 1.0), 1.0),
        ]);
        assert_eq!(group.pairwise_iter(SelfPairs::Exclude).count(), 3);
        assert_eq!(group.pairwise_iter(SelfPairs::Include).count(), 6);

        let single = Group::new(vec![member("a", (0.0, 1.0), (0.0, 1.0), 1.0)]);
        assert_eq!(single.pairwise_iter(SelfPairs::Exclude).count(), 0);
        assert_eq!(single.pairwise_iter(SelfPairs::Include).count(), 1);
    }

    #[test]
    fn test_inter_group_pairs() {
        let grouper = Grouper::from_metadata(sample_members(), &SimilarityConfig::default());
        let pairs: Vec<_> = grouper.inter_group_pairs().collect();
        // 5 members in one group, 1 in the other
        assert_eq!(pairs.len(), 5);
        for (m1, m2) in pairs {
            assert!(!m1.bounds.intersects(&m2.bounds));
        }
    }

    #[test]
    fn test_verify_disjoint_reports_violation() {
        // Two groups built by hand that actually touch
        let mut grouper = Grouper::new(&SimilarityConfig::default());
        grouper.groups.push(Group::new(vec![member("a", (0.0, 1.0), (0.0, 1.0), 1.0)]));
        grouper.groups.push(Group::new(vec![member("b", (0.5, 1.5), (0.5, 1.5), 1.0)]));
        let violations = grouper.verify_disjoint();
        assert_eq!(violations, vec![("a".to_string(), "b".to_string())]);
    }
}
