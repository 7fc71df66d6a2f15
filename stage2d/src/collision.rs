//! Contact tracking and collision listener dispatch.

use std::collections::HashMap;

use crate::actor::ActorId;
use crate::error::{StageError, StageResult};
use crate::math::Vec2;
use crate::registry::ListenerId;
use crate::scene::Scene;

// Rapier is private implementation detail: do NOT re-export it.
use rapier2d::prelude::ColliderHandle;

/// What a collision listener is registered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollisionTarget {
    /// Every contact involving the actor.
    Actor(ActorId),
    /// Contacts between the two actors only. The first actor is the one the
    /// event is reported for.
    Pair(ActorId, ActorId),
}

impl CollisionTarget {
    pub fn owner(&self) -> ActorId {
        match self {
            CollisionTarget::Actor(a) | CollisionTarget::Pair(a, _) => *a,
        }
    }

    fn matches(&self, a: ActorId, b: ActorId) -> bool {
        match *self {
            CollisionTarget::Actor(x) => x == a || x == b,
            CollisionTarget::Pair(x, y) => (x == a && y == b) || (x == b && y == a),
        }
    }

    pub(crate) fn involves(&self, actor: ActorId) -> bool {
        match *self {
            CollisionTarget::Actor(x) => x == actor,
            CollisionTarget::Pair(x, y) => x == actor || y == actor,
        }
    }
}

/// A contact transition as seen from one of the two actors.
#[derive(Clone, Debug, PartialEq)]
pub struct CollisionEvent {
    /// The actor the listener was registered on.
    pub actor: ActorId,
    pub colliding: ActorId,
    /// Contact normal pointing from `actor` toward `colliding`. Zero for
    /// contact ends and sensor overlaps.
    pub normal: Vec2,
    /// World-space contact points (0 to 2). Empty for contact ends.
    pub points: Vec<Vec2>,
    /// True if either side is a sensor.
    pub sensor: bool,
}

/// Receives begin/end notifications for the contacts it is registered on.
pub trait CollisionListener {
    fn on_collision(&mut self, scene: &mut Scene, event: &CollisionEvent) -> anyhow::Result<()>;

    fn on_collision_end(
        &mut self,
        _scene: &mut Scene,
        _event: &CollisionEvent,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<F> CollisionListener for F
where
    F: FnMut(&mut Scene, &CollisionEvent) -> anyhow::Result<()>,
{
    fn on_collision(&mut self, scene: &mut Scene, event: &CollisionEvent) -> anyhow::Result<()> {
        self(scene, event)
    }
}

/// Listener built from separate begin and end closures.
pub struct ContactCallbacks<B, E> {
    begin: B,
    end: E,
}

impl<B, E> ContactCallbacks<B, E>
where
    B: FnMut(&mut Scene, &CollisionEvent) -> anyhow::Result<()>,
    E: FnMut(&mut Scene, &CollisionEvent) -> anyhow::Result<()>,
{
    pub fn new(begin: B, end: E) -> Self {
        Self { begin, end }
    }
}

impl<B, E> CollisionListener for ContactCallbacks<B, E>
where
    B: FnMut(&mut Scene, &CollisionEvent) -> anyhow::Result<()>,
    E: FnMut(&mut Scene, &CollisionEvent) -> anyhow::Result<()>,
{
    fn on_collision(&mut self, scene: &mut Scene, event: &CollisionEvent) -> anyhow::Result<()> {
        (self.begin)(scene, event)
    }

    fn on_collision_end(
        &mut self,
        scene: &mut Scene,
        event: &CollisionEvent,
    ) -> anyhow::Result<()> {
        (self.end)(scene, event)
    }
}

/// Begin or end of contact between two actors, world units.
#[derive(Clone, Debug)]
pub(crate) struct ContactTransition {
    pub a: ActorId,
    pub b: ActorId,
    pub began: bool,
    pub sensor: bool,
    /// From `a` toward `b`.
    pub normal: Vec2,
    pub points: Vec<Vec2>,
}

impl ContactTransition {
    pub fn ended(a: ActorId, b: ActorId) -> Self {
        Self {
            a,
            b,
            began: false,
            sensor: false,
            normal: Vec2::ZERO,
            points: Vec::new(),
        }
    }

    fn event_for(&self, owner: ActorId) -> CollisionEvent {
        let (actor, colliding, normal) = if owner == self.a {
            (self.a, self.b, self.normal)
        } else {
            (self.b, self.a, -self.normal)
        };
        CollisionEvent {
            actor,
            colliding,
            normal,
            points: self.points.clone(),
            sensor: self.sensor,
        }
    }
}

type ColliderKey = ((u32, u32), (u32, u32));

fn collider_key(c1: ColliderHandle, c2: ColliderHandle) -> ColliderKey {
    let (k1, k2) = (c1.into_raw_parts(), c2.into_raw_parts());
    if k1 <= k2 {
        (k1, k2)
    } else {
        (k2, k1)
    }
}

fn actor_key(a: ActorId, b: ActorId) -> (ActorId, ActorId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Folds collider-level contacts into actor-pair contacts. An actor pair
/// begins touching when its first collider pair does and stops when its last
/// one stops.
#[derive(Debug, Default)]
pub(crate) struct ContactTracker {
    colliders: HashMap<ColliderKey, (ActorId, ActorId)>,
    pairs: HashMap<(ActorId, ActorId), usize>,
}

impl ContactTracker {
    /// Returns true if this starts contact between the two actors.
    pub fn begin(&mut self, c1: ColliderHandle, c2: ColliderHandle, a: ActorId, b: ActorId) -> bool {
        let key = collider_key(c1, c2);
        if self.colliders.contains_key(&key) {
            return false;
        }
        self.colliders.insert(key, (a, b));
        let count = self.pairs.entry(actor_key(a, b)).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns the actor pair if this ends their contact.
    pub fn end(&mut self, c1: ColliderHandle, c2: ColliderHandle) -> Option<(ActorId, ActorId)> {
        let (a, b) = self.colliders.remove(&collider_key(c1, c2))?;
        self.release(a, b).then_some((a, b))
    }

    /// Forgets every contact of a collider that is going away.
    pub fn purge_collider(&mut self, collider: ColliderHandle) -> Vec<(ActorId, ActorId)> {
        let raw = collider.into_raw_parts();
        let keys: Vec<ColliderKey> = self
            .colliders
            .keys()
            .filter(|(k1, k2)| *k1 == raw || *k2 == raw)
            .copied()
            .collect();
        let mut ended = Vec::new();
        for key in keys {
            if let Some((a, b)) = self.colliders.remove(&key) {
                if self.release(a, b) {
                    ended.push((a, b));
                }
            }
        }
        ended
    }

    fn release(&mut self, a: ActorId, b: ActorId) -> bool {
        let key = actor_key(a, b);
        match self.pairs.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.pairs.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn touching(&self, a: ActorId, b: ActorId) -> bool {
        self.pairs.contains_key(&actor_key(a, b))
    }

    pub fn partners(&self, actor: ActorId) -> Vec<ActorId> {
        let mut out: Vec<ActorId> = self
            .pairs
            .keys()
            .filter_map(|&(x, y)| {
                if x == actor {
                    Some(y)
                } else if y == actor {
                    Some(x)
                } else {
                    None
                }
            })
            .collect();
        out.sort();
        out
    }
}

impl Scene {
    /// Registers a listener. Both actors of a pair target must exist and differ.
    pub fn add_collision_listener(
        &mut self,
        target: CollisionTarget,
        listener: impl CollisionListener + 'static,
    ) -> StageResult<ListenerId> {
        match target {
            CollisionTarget::Actor(a) => {
                self.actor(a)?;
            }
            CollisionTarget::Pair(a, b) => {
                self.actor(a)?;
                self.actor(b)?;
                if a == b {
                    return Err(StageError::argument(format!(
                        "actor {a} cannot listen for collisions with itself"
                    )));
                }
            }
        }
        Ok(self.collision_listeners.insert(target, Box::new(listener)))
    }

    /// Broadcast registration: every contact involving `actor`.
    pub fn on_collision<F>(&mut self, actor: ActorId, callback: F) -> StageResult<ListenerId>
    where
        F: FnMut(&mut Scene, &CollisionEvent) -> anyhow::Result<()> + 'static,
    {
        self.add_collision_listener(CollisionTarget::Actor(actor), callback)
    }

    /// Pair registration: only contacts between `actor` and `other`.
    pub fn on_collision_with<F>(
        &mut self,
        actor: ActorId,
        other: ActorId,
        callback: F,
    ) -> StageResult<ListenerId>
    where
        F: FnMut(&mut Scene, &CollisionEvent) -> anyhow::Result<()> + 'static,
    {
        self.add_collision_listener(CollisionTarget::Pair(actor, other), callback)
    }

    /// Unregisters a collision listener. Safe to call from inside the listener.
    pub fn remove_collision_listener(&mut self, id: ListenerId) -> bool {
        self.collision_listeners.remove(id)
    }

    /// True while the two actors' bodies are in contact.
    pub fn touching(&self, a: ActorId, b: ActorId) -> bool {
        let (Ok(actor_a), Ok(actor_b)) = (self.actor(a), self.actor(b)) else {
            return false;
        };
        if actor_a.layer() != actor_b.layer() {
            return false;
        }
        self.layer(actor_a.layer())
            .ok()
            .and_then(|l| l.world.as_ref())
            .is_some_and(|w| w.touching(a, b))
    }

    /// Every actor currently in contact with `actor`, sorted by id. Empty for
    /// actors without a body.
    pub fn touching_actors(&self, actor: ActorId) -> StageResult<Vec<ActorId>> {
        let layer = self.actor(actor)?.layer();
        Ok(self
            .layer(layer)?
            .world
            .as_ref()
            .map(|w| w.touching_actors(actor))
            .unwrap_or_default())
    }

    /// Dispatches the contact transitions of every world, in layer order.
    pub(crate) fn dispatch_collisions(&mut self) {
        let layer_ids = self.layer_ids();
        for layer in layer_ids {
            let transitions = match self.layer_mut(layer).ok().and_then(|l| l.world.as_mut()) {
                Some(world) => world.drain_transitions(),
                None => continue,
            };
            for transition in &transitions {
                self.dispatch_transition(transition);
            }
        }
    }

    fn dispatch_transition(&mut self, t: &ContactTransition) {
        if !self.contains_actor(t.a) || !self.contains_actor(t.b) {
            log::trace!("skipping contact of removed actor ({}, {})", t.a, t.b);
            return;
        }
        let ids = self.collision_listeners.matching(|target| target.matches(t.a, t.b));
        for id in ids {
            // A previous listener may have removed one of the actors.
            if !self.contains_actor(t.a) || !self.contains_actor(t.b) {
                return;
            }
            let Some(target) = self.collision_listeners.key(id) else {
                continue;
            };
            let Some(mut listener) = self.collision_listeners.take(id) else {
                continue;
            };
            let event = t.event_for(target.owner());
            let result = if t.began {
                listener.on_collision(self, &event)
            } else {
                listener.on_collision_end(self, &event)
            };
            self.collision_listeners.restore(id, listener);
            if let Err(err) = result {
                log::error!(
                    "collision listener {id} failed on {} between {} and {}: {err:#}",
                    if t.began { "begin" } else { "end" },
                    event.actor,
                    event.colliding
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collider(i: u32) -> ColliderHandle {
        ColliderHandle::from_raw_parts(i, 0)
    }

    #[test]
    fn pair_contact_is_counted_across_fixtures() {
        let (a, b) = (ActorId::from_u32(1), ActorId::from_u32(2));
        let mut tracker = ContactTracker::default();
        assert!(tracker.begin(collider(0), collider(5), a, b));
        assert!(!tracker.begin(collider(1), collider(5), a, b));
        assert!(!tracker.begin(collider(5), collider(0), b, a));
        assert!(tracker.touching(b, a));

        assert_eq!(tracker.end(collider(5), collider(0)), None);
        assert_eq!(tracker.end(collider(1), collider(5)), Some((a, b)));
        assert!(!tracker.touching(a, b));
        assert_eq!(tracker.end(collider(1), collider(5)), None);
    }

    #[test]
    fn purge_reports_pairs_that_stop_touching() {
        let (a, b, c) = (ActorId::from_u32(1), ActorId::from_u32(2), ActorId::from_u32(3));
        let mut tracker = ContactTracker::default();
        tracker.begin(collider(0), collider(1), a, b);
        tracker.begin(collider(0), collider(2), a, c);
        tracker.begin(collider(3), collider(2), a, c);

        assert_eq!(tracker.partners(a), vec![b, c]);

        let ended = tracker.purge_collider(collider(0));
        assert_eq!(ended, vec![(a, b)]);
        assert!(tracker.touching(a, c));
        assert_eq!(tracker.partners(a), vec![c]);
        assert_eq!(tracker.partners(c), vec![a]);
        assert!(tracker.partners(b).is_empty());
    }

    #[test]
    fn events_are_oriented_toward_the_owner() {
        let (a, b) = (ActorId::from_u32(1), ActorId::from_u32(2));
        let t = ContactTransition {
            a,
            b,
            began: true,
            sensor: false,
            normal: Vec2::new(0.0, 1.0),
            points: vec![Vec2::new(1.0, 1.0)],
        };
        let for_b = t.event_for(b);
        assert_eq!(for_b.actor, b);
        assert_eq!(for_b.colliding, a);
        assert_eq!(for_b.normal, Vec2::new(0.0, -1.0));
        assert!(CollisionTarget::Pair(b, a).matches(a, b));
        assert!(!CollisionTarget::Actor(ActorId::from_u32(9)).matches(a, b));
    }
}
