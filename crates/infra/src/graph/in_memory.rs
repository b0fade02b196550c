//! In-memory bitemporal graph store.
//!
//! Intended for tests/dev. Not optimized for performance: a write transaction
//! works on a private copy of the whole graph and swaps it in on commit, which
//! gives the same all-or-nothing behavior as the relational backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use circlegraph_core::{
    Direction, Edge, EdgeClass, MemberId, RoleEvent, RoleId, Timeline, TimelineNumber, Vertex,
    VertexClass,
};

use super::{ConnectedVertex, GraphStore, GraphTx, StoreError, StoreResult, TimelineRange, VertexQuery};

#[derive(Debug, Clone)]
struct Versioned<T> {
    start: TimelineNumber,
    end: Option<TimelineNumber>,
    value: T,
}

impl<T> Versioned<T> {
    fn visible_at(&self, t: TimelineNumber) -> bool {
        self.start <= t && self.end.is_none_or(|end| end >= t)
    }

    fn is_current(&self) -> bool {
        self.end.is_none()
    }
}

/// Versions of one key, oldest first.
type History<T> = Vec<Versioned<T>>;

fn visible<T>(history: &History<T>, t: TimelineNumber) -> Option<&T> {
    history.iter().find(|v| v.visible_at(t)).map(|v| &v.value)
}

fn current_mut<T>(history: &mut History<T>) -> Option<&mut Versioned<T>> {
    history.iter_mut().find(|v| v.is_current())
}

/// Close the current version at `t - 1`; one that started at `t` is dropped.
fn close_current<T>(history: Option<&mut History<T>>, t: TimelineNumber) -> bool {
    let Some(history) = history else {
        return false;
    };
    let Some(pos) = history.iter().position(Versioned::is_current) else {
        return false;
    };
    if history[pos].start == t {
        history.remove(pos);
    } else {
        history[pos].end = Some(t.prev());
    }
    true
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    timelines: BTreeMap<TimelineNumber, Timeline>,
    groups: HashMap<Uuid, TimelineNumber>,
    checkpoint: i64,
    vertices: HashMap<VertexClass, BTreeMap<Uuid, History<Vertex>>>,
    edges: HashMap<EdgeClass, BTreeMap<(Uuid, Uuid), History<Edge>>>,
    role_events: Vec<RoleEvent>,
    passwords: HashMap<MemberId, String>,
    match_uids: HashMap<String, MemberId>,
}

impl GraphState {
    fn vertex_visible(&self, class: VertexClass, id: Uuid, t: TimelineNumber) -> bool {
        self.vertices
            .get(&class)
            .and_then(|rows| rows.get(&id))
            .and_then(|history| visible(history, t))
            .is_some()
    }
}

/// In-memory graph store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    state: Arc<RwLock<Arc<GraphState>>>,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> StoreResult<Arc<GraphState>> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|_| StoreError::execution("snapshot", "lock poisoned"))
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn begin(&self) -> StoreResult<Box<dyn GraphTx>> {
        let guard = self.writer.clone().lock_owned().await;
        let working = (*self.snapshot()?).clone();
        Ok(Box::new(InMemoryTx {
            target: self.state.clone(),
            mode: Mode::Write {
                state: working,
                _guard: guard,
            },
        }))
    }

    async fn begin_read(&self) -> StoreResult<Box<dyn GraphTx>> {
        Ok(Box::new(InMemoryTx {
            target: self.state.clone(),
            mode: Mode::Read(self.snapshot()?),
        }))
    }
}

enum Mode {
    Read(Arc<GraphState>),
    Write {
        state: GraphState,
        _guard: OwnedMutexGuard<()>,
    },
}

struct InMemoryTx {
    target: Arc<RwLock<Arc<GraphState>>>,
    mode: Mode,
}

impl InMemoryTx {
    fn state(&self) -> &GraphState {
        match &self.mode {
            Mode::Read(state) => state,
            Mode::Write { state, .. } => state,
        }
    }

    fn state_mut(&mut self, operation: &str) -> StoreResult<&mut GraphState> {
        match &mut self.mode {
            Mode::Read(_) => Err(StoreError::execution(operation, "read-only transaction")),
            Mode::Write { state, .. } => Ok(state),
        }
    }
}

#[async_trait]
impl GraphTx for InMemoryTx {
    async fn current_timeline(&mut self) -> StoreResult<Option<Timeline>> {
        Ok(self.state().timelines.values().next_back().cloned())
    }

    async fn timeline(&mut self, number: TimelineNumber) -> StoreResult<Option<Timeline>> {
        Ok(self.state().timelines.get(&number).cloned())
    }

    async fn timeline_for_group(&mut self, group_id: Uuid) -> StoreResult<Option<Timeline>> {
        let state = self.state();
        Ok(state
            .groups
            .get(&group_id)
            .and_then(|n| state.timelines.get(n))
            .cloned())
    }

    async fn timelines(&mut self, range: TimelineRange, limit: usize) -> StoreResult<Vec<Timeline>> {
        Ok(self
            .state()
            .timelines
            .values()
            .rev()
            .filter(|tl| range.before.is_none_or(|b| tl.number < b))
            .filter(|tl| range.after.is_none_or(|a| tl.number > a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_timeline(&mut self, timeline: &Timeline) -> StoreResult<()> {
        let state = self.state_mut("insert_timeline")?;
        if state.timelines.contains_key(&timeline.number) {
            return Err(StoreError::Conflict(format!("timeline {} exists", timeline.number)));
        }
        if state.groups.contains_key(&timeline.group_id) {
            return Err(StoreError::Conflict(format!(
                "group {} already has a timeline",
                timeline.group_id
            )));
        }
        state.groups.insert(timeline.group_id, timeline.number);
        state.timelines.insert(timeline.number, timeline.clone());
        Ok(())
    }

    async fn checkpoint(&mut self) -> StoreResult<i64> {
        Ok(self.state().checkpoint)
    }

    async fn set_checkpoint(&mut self, sequence_number: i64) -> StoreResult<()> {
        self.state_mut("set_checkpoint")?.checkpoint = sequence_number;
        Ok(())
    }

    async fn fetch_vertices(
        &mut self,
        t: TimelineNumber,
        class: VertexClass,
        query: &VertexQuery,
    ) -> StoreResult<Vec<Vertex>> {
        query.validate(class)?;
        let mut found: Vec<Vertex> = self
            .state()
            .vertices
            .get(&class)
            .into_iter()
            .flat_map(|rows| rows.values())
            .filter_map(|history| visible(history, t))
            .filter(|v| query.filter.as_ref().is_none_or(|f| f.matches(v)))
            .cloned()
            .collect();
        found.sort_by(|a, b| query.compare(a, b));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn fetch_connected(
        &mut self,
        t: TimelineNumber,
        sources: &[Uuid],
        class: EdgeClass,
        direction: Direction,
        query: &VertexQuery,
    ) -> StoreResult<HashMap<Uuid, Vec<ConnectedVertex>>> {
        let target_class = class.target_class(direction);
        query.validate(target_class)?;

        let state = self.state();
        let mut grouped: HashMap<Uuid, Vec<ConnectedVertex>> = HashMap::new();
        let Some(edges) = state.edges.get(&class) else {
            return Ok(grouped);
        };
        let targets = state.vertices.get(&target_class);

        for history in edges.values() {
            let Some(edge) = visible(history, t) else {
                continue;
            };
            let (source, target) = match direction {
                Direction::Out => (edge.x, edge.y),
                Direction::In => (edge.y, edge.x),
            };
            if !sources.contains(&source) {
                continue;
            }
            let Some(vertex) = targets
                .and_then(|rows| rows.get(&target))
                .and_then(|h| visible(h, t))
            else {
                continue;
            };
            if !query.filter.as_ref().is_none_or(|f| f.matches(vertex)) {
                continue;
            }
            grouped.entry(source).or_default().push(ConnectedVertex {
                source,
                vertex: vertex.clone(),
                payload: edge.payload.clone(),
            });
        }

        for group in grouped.values_mut() {
            group.sort_by(|a, b| query.compare(&a.vertex, &b.vertex));
            if let Some(limit) = query.limit {
                group.truncate(limit);
            }
        }
        Ok(grouped)
    }

    async fn insert_vertex(&mut self, t: TimelineNumber, vertex: &Vertex) -> StoreResult<()> {
        let state = self.state_mut("insert_vertex")?;
        let history = state
            .vertices
            .entry(vertex.class())
            .or_default()
            .entry(vertex.id())
            .or_default();
        if history.iter().any(Versioned::is_current) {
            return Err(StoreError::Conflict(format!(
                "{} {} already has a current version",
                vertex.class(),
                vertex.id()
            )));
        }
        history.push(Versioned {
            start: t,
            end: None,
            value: vertex.clone(),
        });
        Ok(())
    }

    async fn close_vertex(&mut self, t: TimelineNumber, class: VertexClass, id: Uuid) -> StoreResult<bool> {
        let state = self.state_mut("close_vertex")?;
        let history = state.vertices.get_mut(&class).and_then(|rows| rows.get_mut(&id));
        Ok(close_current(history, t))
    }

    async fn rewrite_vertex(&mut self, t: TimelineNumber, vertex: &Vertex) -> StoreResult<bool> {
        let state = self.state_mut("rewrite_vertex")?;
        let current = state
            .vertices
            .get_mut(&vertex.class())
            .and_then(|rows| rows.get_mut(&vertex.id()))
            .and_then(current_mut);
        Ok(match current {
            Some(row) if row.start == t => {
                row.value = vertex.clone();
                true
            }
            _ => false,
        })
    }

    async fn add_edge(&mut self, t: TimelineNumber, edge: &Edge) -> StoreResult<()> {
        let state = self.state_mut("add_edge")?;
        let history = state
            .edges
            .entry(edge.class)
            .or_default()
            .entry((edge.x, edge.y))
            .or_default();
        if history.iter().any(Versioned::is_current) {
            return Err(StoreError::Conflict(format!(
                "{} edge {} -> {} already has a current version",
                edge.class, edge.x, edge.y
            )));
        }
        history.push(Versioned {
            start: t,
            end: None,
            value: edge.clone(),
        });
        Ok(())
    }

    async fn close_edge(&mut self, t: TimelineNumber, class: EdgeClass, x: Uuid, y: Uuid) -> StoreResult<bool> {
        let state = self.state_mut("close_edge")?;
        let history = state.edges.get_mut(&class).and_then(|rows| rows.get_mut(&(x, y)));
        Ok(close_current(history, t))
    }

    async fn rewrite_edge(&mut self, t: TimelineNumber, edge: &Edge) -> StoreResult<bool> {
        let state = self.state_mut("rewrite_edge")?;
        let current = state
            .edges
            .get_mut(&edge.class)
            .and_then(|rows| rows.get_mut(&(edge.x, edge.y)))
            .and_then(current_mut);
        match current {
            Some(row) if row.start == t => {
                row.value = edge.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn edge_integrity(&mut self, t: TimelineNumber, class: EdgeClass) -> StoreResult<(u64, u64)> {
        let state = self.state();
        let (mut total, mut valid) = (0u64, 0u64);
        for history in state.edges.get(&class).into_iter().flat_map(|rows| rows.values()) {
            let Some(edge) = visible(history, t) else {
                continue;
            };
            total += 1;
            if state.vertex_visible(class.x_class(), edge.x, t)
                && state.vertex_visible(class.y_class(), edge.y, t)
            {
                valid += 1;
            }
        }
        Ok((total, valid))
    }

    async fn role_events_at(&mut self, t: TimelineNumber, role_id: RoleId) -> StoreResult<Vec<RoleEvent>> {
        Ok(self
            .state()
            .role_events
            .iter()
            .filter(|e| e.timeline == t && e.role_id == role_id)
            .cloned()
            .collect())
    }

    async fn delete_role_events(&mut self, t: TimelineNumber, role_id: RoleId) -> StoreResult<()> {
        self.state_mut("delete_role_events")?
            .role_events
            .retain(|e| !(e.timeline == t && e.role_id == role_id));
        Ok(())
    }

    async fn insert_role_event(&mut self, event: &RoleEvent) -> StoreResult<()> {
        self.state_mut("insert_role_event")?
            .role_events
            .push(event.clone());
        Ok(())
    }

    async fn role_events(
        &mut self,
        role_id: RoleId,
        before: Option<TimelineNumber>,
        limit: usize,
    ) -> StoreResult<Vec<RoleEvent>> {
        let mut found: Vec<RoleEvent> = self
            .state()
            .role_events
            .iter()
            .filter(|e| e.role_id == role_id)
            .filter(|e| before.is_none_or(|b| e.timeline < b))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.timeline.cmp(&a.timeline));
        found.truncate(limit);
        Ok(found)
    }

    async fn set_password(&mut self, member_id: MemberId, password_hash: &str) -> StoreResult<()> {
        self.state_mut("set_password")?
            .passwords
            .insert(member_id, password_hash.to_string());
        Ok(())
    }

    async fn password_hash(&mut self, member_id: MemberId) -> StoreResult<Option<String>> {
        Ok(self.state().passwords.get(&member_id).cloned())
    }

    async fn set_match_uid(&mut self, member_id: MemberId, match_uid: &str) -> StoreResult<()> {
        let state = self.state_mut("set_match_uid")?;
        if let Some(owner) = state.match_uids.get(match_uid) {
            if *owner != member_id {
                return Err(StoreError::Conflict(format!(
                    "match uid already assigned to member {owner}"
                )));
            }
        }
        // one match uid per member
        state.match_uids.retain(|_, m| *m != member_id);
        state.match_uids.insert(match_uid.to_string(), member_id);
        Ok(())
    }

    async fn member_by_match_uid(&mut self, match_uid: &str) -> StoreResult<Option<MemberId>> {
        Ok(self.state().match_uids.get(match_uid).copied())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTx { target, mode } = *self;
        if let Mode::Write { state, _guard } = mode {
            let mut shared = target
                .write()
                .map_err(|_| StoreError::execution("commit", "lock poisoned"))?;
            *shared = Arc::new(state);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
