//! Frame update listeners, periodic tasks and deferred actions, and the
//! fixed-order tick that runs them.
//!
//! Tick order:
//! 1. step every layer world
//! 2. dispatch collision transitions
//! 3. release joints that lost their bodies
//! 4. global listeners, then scene, layer and actor listeners
//! 5. periodic tasks, with catch-up
//! 6. deferred actions
//! 7. purge removed registrations, update camera and layer transforms

use std::fmt;

use crate::actor::ActorId;
use crate::error::{StageError, StageResult};
use crate::layer::LayerId;
use crate::registry::{ListenerId, Registry};
use crate::scene::Scene;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Called once per tick with the elapsed time, scaled by the layer's time
/// distortion for layer and actor scopes.
pub trait FrameUpdateListener {
    fn on_frame_update(&mut self, scene: &mut Scene, dt: f32) -> anyhow::Result<()>;
}

impl<F> FrameUpdateListener for F
where
    F: FnMut(&mut Scene, f32) -> anyhow::Result<()>,
{
    fn on_frame_update(&mut self, scene: &mut Scene, dt: f32) -> anyhow::Result<()> {
        self(scene, dt)
    }
}

/// What a frame listener or periodic task belongs to. Actor-scoped entries
/// are dropped together with the actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameScope {
    Scene,
    Layer(LayerId),
    Actor(ActorId),
}

pub(crate) type DeferredAction = Box<dyn FnOnce(&mut Scene) -> anyhow::Result<()>>;
pub(crate) type GlobalListeners = Registry<(), dyn FrameUpdateListener>;

type TaskBody = Box<dyn FnMut(&mut Scene, u32) -> anyhow::Result<()>>;
type TaskFinish = Box<dyn FnOnce(&mut Scene) -> anyhow::Result<()>>;

struct PeriodicTask {
    id: TaskId,
    scope: FrameScope,
    interval: f32,
    countdown: f32,
    /// `None` repeats forever.
    repetitions: Option<u32>,
    counter: u32,
    paused: bool,
    removed: bool,
    body: Option<TaskBody>,
    finish: Option<TaskFinish>,
}

#[derive(Default)]
pub(crate) struct TaskTable {
    tasks: Vec<PeriodicTask>,
    next_id: u32,
}

impl TaskTable {
    fn get(&self, id: TaskId) -> Option<&PeriodicTask> {
        self.tasks.iter().find(|t| t.id == id && !t.removed)
    }

    fn get_mut(&mut self, id: TaskId) -> Option<&mut PeriodicTask> {
        self.tasks.iter_mut().find(|t| t.id == id && !t.removed)
    }

    fn active_ids(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| !t.removed)
            .map(|t| t.id)
            .collect()
    }

    pub fn remove_scope(&mut self, scope: FrameScope) {
        for task in self.tasks.iter_mut().filter(|t| t.scope == scope) {
            task.removed = true;
        }
    }

    pub fn purge(&mut self) {
        self.tasks.retain(|t| !t.removed);
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

fn check_interval(interval: f32) -> StageResult<()> {
    if interval.is_finite() && interval > 0.0 {
        Ok(())
    } else {
        Err(StageError::InvalidInterval(interval))
    }
}

impl Scene {
    // ------------------------------
    // Frame listeners
    // ------------------------------

    fn check_scope(&self, scope: FrameScope) -> StageResult<()> {
        match scope {
            FrameScope::Scene => Ok(()),
            FrameScope::Layer(layer) => self.layer(layer).map(|_| ()),
            FrameScope::Actor(actor) => self.actor(actor).map(|_| ()),
        }
    }

    pub fn add_frame_listener(
        &mut self,
        scope: FrameScope,
        listener: impl FrameUpdateListener + 'static,
    ) -> StageResult<ListenerId> {
        self.check_scope(scope)?;
        Ok(self.frame_listeners.insert(scope, Box::new(listener)))
    }

    pub fn on_frame<F>(&mut self, scope: FrameScope, callback: F) -> StageResult<ListenerId>
    where
        F: FnMut(&mut Scene, f32) -> anyhow::Result<()> + 'static,
    {
        self.add_frame_listener(scope, callback)
    }

    /// Safe to call from inside the listener itself.
    pub fn remove_frame_listener(&mut self, id: ListenerId) -> bool {
        self.frame_listeners.remove(id)
    }

    // ------------------------------
    // Periodic tasks
    // ------------------------------

    fn insert_task(
        &mut self,
        scope: FrameScope,
        interval: f32,
        repetitions: Option<u32>,
        body: TaskBody,
    ) -> StageResult<TaskId> {
        check_interval(interval)?;
        self.check_scope(scope)?;
        let id = TaskId(self.tasks.next_id);
        self.tasks.next_id += 1;
        self.tasks.tasks.push(PeriodicTask {
            id,
            scope,
            interval,
            countdown: interval,
            repetitions,
            counter: 0,
            paused: false,
            removed: false,
            body: Some(body),
            finish: None,
        });
        Ok(id)
    }

    /// Runs `body` every `interval` seconds of scene time. The callback gets
    /// the number of the run, starting at 1.
    pub fn repeat<F>(&mut self, interval: f32, body: F) -> StageResult<TaskId>
    where
        F: FnMut(&mut Scene, u32) -> anyhow::Result<()> + 'static,
    {
        self.insert_task(FrameScope::Scene, interval, None, Box::new(body))
    }

    /// Like [`Scene::repeat`], in the time of the actor's layer. The task is
    /// removed with the actor.
    pub fn repeat_for_actor<F>(&mut self, actor: ActorId, interval: f32, body: F) -> StageResult<TaskId>
    where
        F: FnMut(&mut Scene, u32) -> anyhow::Result<()> + 'static,
    {
        self.insert_task(FrameScope::Actor(actor), interval, None, Box::new(body))
    }

    /// Runs `body` `times` times, then unregisters the task.
    pub fn repeat_times<F>(&mut self, interval: f32, times: u32, body: F) -> StageResult<TaskId>
    where
        F: FnMut(&mut Scene, u32) -> anyhow::Result<()> + 'static,
    {
        if times == 0 {
            return Err(StageError::argument("a task must run at least once"));
        }
        self.insert_task(FrameScope::Scene, interval, Some(times), Box::new(body))
    }

    /// Runs once after the last repetition of a counted task.
    pub fn on_task_finished<F>(&mut self, id: TaskId, finish: F) -> StageResult<()>
    where
        F: FnOnce(&mut Scene) -> anyhow::Result<()> + 'static,
    {
        let task = self.tasks.get_mut(id).ok_or(StageError::UnknownTask(id))?;
        task.finish = Some(Box::new(finish));
        Ok(())
    }

    pub fn task_interval(&self, id: TaskId) -> StageResult<f32> {
        Ok(self.tasks.get(id).ok_or(StageError::UnknownTask(id))?.interval)
    }

    /// Number of completed runs.
    pub fn task_counter(&self, id: TaskId) -> StageResult<u32> {
        Ok(self.tasks.get(id).ok_or(StageError::UnknownTask(id))?.counter)
    }

    pub fn is_task_active(&self, id: TaskId) -> bool {
        self.tasks.get(id).is_some()
    }

    pub fn is_task_paused(&self, id: TaskId) -> StageResult<bool> {
        Ok(self.tasks.get(id).ok_or(StageError::UnknownTask(id))?.paused)
    }

    /// Changes the interval and restarts the countdown.
    pub fn set_task_interval(&mut self, id: TaskId, interval: f32) -> StageResult<()> {
        check_interval(interval)?;
        let task = self.tasks.get_mut(id).ok_or(StageError::UnknownTask(id))?;
        task.interval = interval;
        task.countdown = interval;
        Ok(())
    }

    /// Pausing keeps the remaining countdown.
    pub fn pause_task(&mut self, id: TaskId) -> StageResult<()> {
        self.tasks.get_mut(id).ok_or(StageError::UnknownTask(id))?.paused = true;
        Ok(())
    }

    pub fn resume_task(&mut self, id: TaskId) -> StageResult<()> {
        self.tasks.get_mut(id).ok_or(StageError::UnknownTask(id))?.paused = false;
        Ok(())
    }

    /// Returns the new paused state.
    pub fn toggle_task(&mut self, id: TaskId) -> StageResult<bool> {
        let task = self.tasks.get_mut(id).ok_or(StageError::UnknownTask(id))?;
        task.paused = !task.paused;
        Ok(task.paused)
    }

    /// The task becomes inert at once, even when called from its own body.
    pub fn unregister_task(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(id) {
            Some(task) => {
                task.removed = true;
                true
            }
            None => false,
        }
    }

    // ------------------------------
    // Deferred actions
    // ------------------------------

    /// Queues an action for the end of the current tick, after periodic tasks.
    pub fn defer<F>(&mut self, action: F)
    where
        F: FnOnce(&mut Scene) -> anyhow::Result<()> + 'static,
    {
        self.deferred.push_back(Box::new(action));
    }

    // ------------------------------
    // Tick
    // ------------------------------

    /// Runs one tick without global listeners.
    pub fn update(&mut self, dt: f32) -> StageResult<()> {
        let mut globals = GlobalListeners::default();
        self.tick_with(dt, &mut globals)
    }

    /// A world that faults during the step ends the tick right there: no
    /// collisions, listeners or tasks run, and the fault is returned. Later
    /// ticks skip the frozen world.
    pub(crate) fn tick_with(&mut self, dt: f32, globals: &mut GlobalListeners) -> StageResult<()> {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        log::trace!("tick dt={dt}");

        if let Some(fault) = self.step_worlds(dt).into_iter().next() {
            return Err(fault);
        }
        self.dispatch_collisions();
        self.sweep_joints();

        for id in globals.matching(|_| true) {
            let Some(mut listener) = globals.take(id) else {
                continue;
            };
            let result = listener.on_frame_update(self, dt);
            globals.restore(id, listener);
            if let Err(err) = result {
                log::error!("global frame listener {id} failed: {err:#}");
            }
        }
        self.dispatch_frame_listeners(dt);
        self.run_tasks(dt);
        self.run_deferred();

        self.collision_listeners.purge();
        self.frame_listeners.purge();
        self.tasks.purge();
        globals.purge();
        self.update_view(dt);
        Ok(())
    }

    fn dispatch_frame_listeners(&mut self, dt: f32) {
        let ids = self
            .frame_listeners
            .matching(|scope| *scope == FrameScope::Scene);
        self.call_frame_listeners(&ids, dt);

        let layers = self.layer_ids();
        for &layer in &layers {
            let Ok(distort) = self.layer(layer).map(|l| l.time_distort()) else {
                continue;
            };
            let ids = self
                .frame_listeners
                .matching(|scope| *scope == FrameScope::Layer(layer));
            self.call_frame_listeners(&ids, dt * distort);
        }

        for &layer in &layers {
            let Ok((distort, actors)) = self
                .layer(layer)
                .map(|l| (l.time_distort(), l.actors().to_vec()))
            else {
                continue;
            };
            for actor in actors {
                let ids = self
                    .frame_listeners
                    .matching(|scope| *scope == FrameScope::Actor(actor));
                self.call_frame_listeners(&ids, dt * distort);
            }
        }
    }

    fn call_frame_listeners(&mut self, ids: &[ListenerId], dt: f32) {
        for &id in ids {
            let Some(mut listener) = self.frame_listeners.take(id) else {
                continue;
            };
            let result = listener.on_frame_update(self, dt);
            self.frame_listeners.restore(id, listener);
            if let Err(err) = result {
                let scope = self.frame_listeners.key(id);
                log::error!("frame listener {id} ({scope:?}) failed: {err:#}");
            }
        }
    }

    /// Time scale of a task's scope, `None` if the scope no longer exists.
    fn task_time_scale(&self, scope: FrameScope) -> Option<f32> {
        let layer = match scope {
            FrameScope::Scene => return Some(1.0),
            FrameScope::Layer(layer) => layer,
            FrameScope::Actor(actor) => self.actor(actor).ok()?.layer(),
        };
        self.layer(layer).ok().map(|l| l.time_distort())
    }

    fn run_tasks(&mut self, dt: f32) {
        for id in self.tasks.active_ids() {
            let Some(scope) = self.tasks.get(id).map(|t| t.scope) else {
                continue;
            };
            let Some(scale) = self.task_time_scale(scope) else {
                continue;
            };
            match self.tasks.get_mut(id) {
                Some(task) if !task.paused => task.countdown -= dt * scale,
                _ => continue,
            }
            self.catch_up(id);
        }
    }

    /// Fires the task once for every interval that has fully elapsed.
    fn catch_up(&mut self, id: TaskId) {
        loop {
            let Some(task) = self.tasks.get_mut(id) else {
                return;
            };
            if task.paused || task.countdown >= 0.0 {
                return;
            }
            task.countdown += task.interval;
            task.counter += 1;
            let run = task.counter;
            let Some(mut body) = task.body.take() else {
                return;
            };

            let result = body(self, run);
            if let Some(task) = self.tasks.get_mut(id) {
                task.body = Some(body);
            }
            if let Err(err) = result {
                log::error!("periodic task {id} failed on run {run}: {err:#}");
            }

            let finished = self.tasks.get_mut(id).and_then(|task| match task.repetitions {
                Some(limit) if task.counter >= limit => {
                    task.removed = true;
                    Some(task.finish.take())
                }
                _ => None,
            });
            if let Some(finish) = finished {
                if let Some(finish) = finish {
                    if let Err(err) = finish(self) {
                        log::error!("final action of task {id} failed: {err:#}");
                    }
                }
                return;
            }
        }
    }

    /// Drains the queue, including actions queued while draining.
    fn run_deferred(&mut self) {
        while let Some(action) = self.deferred.pop_front() {
            if let Err(err) = action(self) {
                log::error!("deferred action failed: {err:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::actor::ActorDesc;

    #[test]
    fn catch_up_fires_every_elapsed_interval() {
        let mut scene = Scene::new();
        let runs = Rc::new(RefCell::new(Vec::new()));
        let seen = runs.clone();
        let id = scene
            .repeat(0.1, move |_, n| {
                seen.borrow_mut().push(n);
                Ok(())
            })
            .unwrap();
        scene.update(0.35).unwrap();
        assert_eq!(*runs.borrow(), vec![1, 2, 3]);
        assert_eq!(scene.task_counter(id).unwrap(), 3);
    }

    #[test]
    fn invalid_intervals_are_rejected() {
        let mut scene = Scene::new();
        assert!(matches!(
            scene.repeat(0.0, |_, _| Ok(())),
            Err(StageError::InvalidInterval(_))
        ));
        let id = scene.repeat(1.0, |_, _| Ok(())).unwrap();
        assert!(scene.set_task_interval(id, -1.0).is_err());
        assert_eq!(scene.task_interval(id).unwrap(), 1.0);
    }

    #[test]
    fn paused_task_keeps_its_phase() {
        let mut scene = Scene::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let id = scene
            .repeat(1.0, move |_, _| {
                c.set(c.get() + 1);
                Ok(())
            })
            .unwrap();
        scene.update(0.6).unwrap();
        assert!(scene.toggle_task(id).unwrap());
        scene.update(5.0).unwrap();
        assert_eq!(count.get(), 0);
        scene.resume_task(id).unwrap();
        scene.update(0.5).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn counted_task_runs_its_final_action() {
        let mut scene = Scene::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2) = (log.clone(), log.clone());
        let id = scene
            .repeat_times(0.5, 2, move |_, n| {
                l1.borrow_mut().push(format!("run {n}"));
                Ok(())
            })
            .unwrap();
        scene
            .on_task_finished(id, move |_| {
                l2.borrow_mut().push("done".to_string());
                Ok(())
            })
            .unwrap();
        scene.update(2.0).unwrap();
        assert_eq!(*log.borrow(), vec!["run 1", "run 2", "done"]);
        assert!(!scene.is_task_active(id));
    }

    #[test]
    fn task_can_unregister_itself() {
        let mut scene = Scene::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let slot: Rc<Cell<Option<TaskId>>> = Rc::new(Cell::new(None));
        let own = slot.clone();
        let id = scene
            .repeat(0.1, move |scene, _| {
                c.set(c.get() + 1);
                if let Some(me) = own.get() {
                    scene.unregister_task(me);
                }
                Ok(())
            })
            .unwrap();
        slot.set(Some(id));
        scene.update(1.0).unwrap();
        assert_eq!(count.get(), 1);
        assert!(!scene.is_task_active(id));
    }

    #[test]
    fn deferred_actions_run_in_order_including_nested() {
        let mut scene = Scene::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let (o1, o2) = (order.clone(), order.clone());
        scene.defer(move |scene| {
            o1.borrow_mut().push(1);
            let o3 = o1.clone();
            scene.defer(move |_| {
                o3.borrow_mut().push(3);
                Ok(())
            });
            Ok(())
        });
        scene.defer(move |_| {
            o2.borrow_mut().push(2);
            anyhow::bail!("fails but does not stop the queue")
        });
        scene.update(0.016).unwrap();
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn layer_listeners_see_distorted_time() {
        let mut scene = Scene::new();
        let slow = scene.add_layer(1);
        scene.layer_mut(slow).unwrap().set_time_distort(0.5).unwrap();
        let actor = scene.add_actor_to(slow, ActorDesc::circle(1.0)).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (s1, s2) = (seen.clone(), seen.clone());
        scene
            .on_frame(FrameScope::Actor(actor), move |_, dt| {
                s1.borrow_mut().push(("actor", dt));
                Ok(())
            })
            .unwrap();
        scene
            .on_frame(FrameScope::Scene, move |_, dt| {
                s2.borrow_mut().push(("scene", dt));
                Ok(())
            })
            .unwrap();
        scene.update(0.2).unwrap();
        assert_eq!(*seen.borrow(), vec![("scene", 0.2), ("actor", 0.1)]);
    }
}
