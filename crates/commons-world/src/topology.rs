//! Group and cluster topology for one experiment.
//!
//! Participants are packed into bounded groups scoped to a session; groups
//! of a session can be partitioned into clusters that share one pool.
//! Forming new groups never touches the data store, so values recorded
//! against earlier memberships stay available for audit.

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use commons_types::{
    ClusterId, Group, GroupCluster, GroupId, Membership, MembershipId, ParticipantId,
};

use crate::error::TopologyError;

/// Parameters for one call to [`Topology::allocate_groups`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Group size limit; `None` is unbounded.
    pub max_group_size: Option<u32>,
    /// Session the new groups belong to.
    pub session_id: String,
    /// Shuffle participants before packing.
    pub randomize: bool,
    /// Keep groups that already exist instead of deleting them.
    pub preserve_existing_groups: bool,
}

/// All groups and clusters of one experiment.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    participants: Vec<ParticipantId>,
    groups: Vec<Group>,
    clusters: Vec<GroupCluster>,
}

impl Topology {
    /// Create an empty topology.
    pub const fn new() -> Self {
        Self {
            participants: Vec::new(),
            groups: Vec::new(),
            clusters: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Participants
    // -----------------------------------------------------------------------

    /// Register a participant. Returns `false` if already registered.
    pub fn register(&mut self, participant: ParticipantId) -> bool {
        if self.participants.contains(&participant) {
            return false;
        }
        self.participants.push(participant);
        true
    }

    /// Registered participants in registration order.
    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    /// Partition registered participants into groups for a session.
    ///
    /// Without `preserve_existing_groups`, every existing group and cluster
    /// is dropped first. With it, existing groups stay and a participant who
    /// already has a group in the target session is skipped. Returns the ids
    /// of the groups participants were placed in.
    ///
    /// # Errors
    ///
    /// [`TopologyError::MissingSessionId`] when groups exist, must be
    /// preserved, and no session id was given. Nothing is changed.
    pub fn allocate_groups<R: Rng + ?Sized>(
        &mut self,
        request: &AllocationRequest,
        rng: &mut R,
    ) -> Result<Vec<GroupId>, TopologyError> {
        if !self.groups.is_empty() {
            if request.preserve_existing_groups {
                if request.session_id.is_empty() {
                    return Err(TopologyError::MissingSessionId);
                }
                debug!(session = %request.session_id, "preserving existing groups");
            } else {
                debug!(groups = self.groups.len(), "deleting existing groups");
                self.groups.clear();
                self.clusters.clear();
            }
        }

        let mut order = self.participants.clone();
        if request.randomize {
            order.shuffle(rng);
        }

        let mut placed: Vec<GroupId> = Vec::new();
        let mut current: Option<GroupId> = None;
        for participant in order {
            let membership =
                self.place(participant, current, request.max_group_size, &request.session_id);
            current = Some(membership.group_id);
            if !placed.contains(&membership.group_id) {
                placed.push(membership.group_id);
            }
        }

        info!(
            session = %request.session_id,
            participants = self.participants.len(),
            groups = placed.len(),
            randomize = request.randomize,
            "groups allocated"
        );
        Ok(placed)
    }

    /// Add a late joiner to the last group of `session_id`, opening a new
    /// group if it is full. Registers the participant if needed.
    ///
    /// A participant who already has a group in the session keeps it.
    pub fn add_participant(
        &mut self,
        participant: ParticipantId,
        max_group_size: Option<u32>,
        session_id: &str,
    ) -> Membership {
        self.register(participant);
        let last = self
            .groups
            .iter()
            .rev()
            .find(|g| g.session_id == session_id)
            .map(|g| g.id);
        self.place(participant, last, max_group_size, session_id)
    }

    /// Put `participant` into `current` if it has room, else a fresh group.
    fn place(
        &mut self,
        participant: ParticipantId,
        current: Option<GroupId>,
        max_group_size: Option<u32>,
        session_id: &str,
    ) -> Membership {
        if let Some(existing) = self
            .groups
            .iter()
            .filter(|g| g.session_id == session_id)
            .find_map(|g| g.membership_of(participant))
        {
            debug!(%participant, group = %existing.group_id, "already grouped in session");
            return *existing;
        }

        let open = current.and_then(|id| {
            self.groups
                .iter_mut()
                .find(|g| g.id == id && !g.is_full())
        });
        if let Some(group) = open {
            return enroll(group, participant);
        }

        let number = u32::try_from(self.groups.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let mut group = Group::new(number, max_group_size, session_id);
        let membership = enroll(&mut group, participant);
        debug!(group = %group.id, number, session = %session_id, "group created");
        self.groups.push(group);
        membership
    }

    /// All groups in creation order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Groups belonging to `session_id`.
    pub fn groups_in_session<'a>(&'a self, session_id: &'a str) -> impl Iterator<Item = &'a Group> {
        self.groups.iter().filter(move |g| g.session_id == session_id)
    }

    /// Look up a group.
    pub fn group(&self, id: GroupId) -> Result<&Group, TopologyError> {
        self.groups
            .iter()
            .find(|g| g.id == id)
            .ok_or(TopologyError::GroupNotFound(id))
    }

    /// Look up a membership and the group it belongs to.
    pub fn membership(&self, id: MembershipId) -> Result<(&Group, &Membership), TopologyError> {
        self.groups
            .iter()
            .find_map(|g| g.members.iter().find(|m| m.id == id).map(|m| (g, m)))
            .ok_or(TopologyError::MembershipNotFound(id))
    }

    /// Every membership across all groups.
    pub fn memberships(&self) -> impl Iterator<Item = &Membership> {
        self.groups.iter().flat_map(|g| g.members.iter())
    }

    // -----------------------------------------------------------------------
    // Clusters
    // -----------------------------------------------------------------------

    /// Replace the session's clusters with a fresh random partition.
    ///
    /// Returns the number of clusters created.
    ///
    /// # Errors
    ///
    /// [`TopologyError::InvalidClusterSize`] for a size of zero and
    /// [`TopologyError::NotDivisible`] when the session's group count is not
    /// a multiple of `cluster_size`. Existing clusters are kept on error.
    pub fn create_clusters<R: Rng + ?Sized>(
        &mut self,
        session_id: &str,
        cluster_size: u32,
        rng: &mut R,
    ) -> Result<usize, TopologyError> {
        let size = usize::try_from(cluster_size)
            .ok()
            .filter(|s| *s > 0)
            .ok_or(TopologyError::InvalidClusterSize)?;
        let mut groups: Vec<GroupId> = self.groups_in_session(session_id).map(|g| g.id).collect();
        if groups.len() % size != 0 {
            return Err(TopologyError::NotDivisible {
                session_id: session_id.to_owned(),
                groups: groups.len(),
                cluster_size,
            });
        }

        self.clusters.retain(|c| c.session_id != session_id);
        groups.shuffle(rng);
        let mut created: usize = 0;
        for chunk in groups.chunks(size) {
            self.clusters.push(GroupCluster {
                id: ClusterId::new(),
                session_id: session_id.to_owned(),
                groups: chunk.to_vec(),
            });
            created = created.saturating_add(1);
        }
        info!(session = %session_id, clusters = created, cluster_size, "group clusters created");
        Ok(created)
    }

    /// All clusters.
    pub fn clusters(&self) -> &[GroupCluster] {
        &self.clusters
    }

    /// Clusters belonging to `session_id`.
    pub fn clusters_in_session<'a>(
        &'a self,
        session_id: &'a str,
    ) -> impl Iterator<Item = &'a GroupCluster> {
        self.clusters
            .iter()
            .filter(move |c| c.session_id == session_id)
    }

    /// The cluster `group` belongs to, if any.
    pub fn cluster_of(&self, group: GroupId) -> Option<&GroupCluster> {
        self.clusters.iter().find(|c| c.contains(group))
    }

    /// The other groups sharing `group`'s cluster.
    pub fn related_groups(&self, group: GroupId) -> Vec<GroupId> {
        self.cluster_of(group)
            .map(|c| c.groups.iter().copied().filter(|g| *g != group).collect())
            .unwrap_or_default()
    }

    /// The first related group, for paired designs.
    pub fn related_group(&self, group: GroupId) -> Option<GroupId> {
        self.related_groups(group).into_iter().next()
    }

    /// Total members across a cluster's groups.
    pub fn cluster_member_count(&self, cluster: &GroupCluster) -> usize {
        cluster
            .groups
            .iter()
            .filter_map(|id| self.group(*id).ok())
            .map(Group::size)
            .sum()
    }

    /// Drop all groups and clusters, keeping registered participants.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.clusters.clear();
    }
}

/// Append `participant` to `group` and return the new membership.
fn enroll(group: &mut Group, participant: ParticipantId) -> Membership {
    let membership = Membership {
        id: MembershipId::new(),
        participant_id: participant,
        group_id: group.id,
        participant_number: u32::try_from(group.members.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1),
    };
    group.members.push(membership);
    membership
}
