use std::cell::{Cell, RefCell};
use std::rc::Rc;

use stage2d::{
    ActorDesc, ActorId, BodyState, BodyType, CollisionEvent, CollisionTarget, ContactCallbacks,
    FrameScope, JointSpec, ListenerId, Parallax, PhysicsProfile, Scene, Stage, StageConfig,
    StageError, TaskId, Vec2,
};

const DT: f32 = 1.0 / 60.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn stage() -> Stage {
    init_logging();
    Stage::new(StageConfig::default()).unwrap()
}

fn dynamic_ball(scene: &mut Scene, x: f32, y: f32) -> ActorId {
    scene
        .add_actor(
            ActorDesc::circle(1.0)
                .at(x, y)
                .with_body_type(BodyType::Dynamic),
        )
        .unwrap()
}

#[test]
fn body_exists_exactly_when_state_is_not_none() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let id = scene.add_actor(ActorDesc::rectangle(1.0, 1.0)).unwrap();
    let layer = scene.main_layer();

    for state in [
        BodyState::Static,
        BodyState::None,
        BodyState::Kinematic,
        BodyState::Dynamic,
        BodyState::Sensor,
        BodyState::Static,
        BodyState::None,
    ] {
        scene.set_body_state(id, state).unwrap();
        assert_eq!(scene.actor(id).unwrap().state(), state);
        assert_eq!(
            scene.layer(layer).unwrap().body_count(),
            usize::from(state != BodyState::None)
        );
    }
}

#[test]
fn pair_listeners_fire_in_registration_order() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let a = dynamic_ball(scene, 0.0, 0.0);
    let b = dynamic_ball(scene, 0.8, 0.0);

    let calls = Rc::new(RefCell::new(Vec::new()));
    let (first, second) = (calls.clone(), calls.clone());
    scene
        .on_collision_with(a, b, move |_, event| {
            first.borrow_mut().push(("first", event.actor, event.colliding, event.normal));
            Ok(())
        })
        .unwrap();
    scene
        .on_collision_with(a, b, move |_, event| {
            second.borrow_mut().push(("second", event.actor, event.colliding, event.normal));
            Ok(())
        })
        .unwrap();

    stage.tick(DT).unwrap();

    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[0].0, calls[0].1, calls[0].2), ("first", a, b));
    assert_eq!((calls[1].0, calls[1].1, calls[1].2), ("second", a, b));
    // The normal points from the registered actor toward the other one.
    assert!(calls[0].3.x > 0.5);
}

#[test]
fn periodic_task_catches_up_within_one_tick() {
    let mut stage = stage();
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    stage
        .scene_mut()
        .repeat(0.1, move |_, _| {
            c.set(c.get() + 1);
            Ok(())
        })
        .unwrap();
    stage.tick(0.35).unwrap();
    assert_eq!(count.get(), 3);
}

#[test]
fn double_release_notifies_once() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let a = dynamic_ball(scene, 0.0, 0.0);
    let b = dynamic_ball(scene, 3.0, 0.0);
    let joint = scene
        .create_joint(a, b, JointSpec::distance(Vec2::new(0.5, 0.5), Vec2::new(0.5, 0.5)))
        .unwrap();
    let notified = Rc::new(Cell::new(0));
    let n = notified.clone();
    scene
        .add_release_listener(joint, move |_, _| {
            n.set(n.get() + 1);
            Ok(())
        })
        .unwrap();

    scene.release_joint(joint).unwrap();
    scene.release_joint(joint).unwrap();
    scene.remove_actor(a).unwrap();
    assert_eq!(notified.get(), 1);
}

#[test]
fn forces_on_static_fail_and_move_dynamic_bodies() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let wall = scene
        .add_actor(ActorDesc::rectangle(1.0, 5.0).with_body_type(BodyType::Static))
        .unwrap();
    let ball = dynamic_ball(scene, 5.0, 0.0);

    assert!(matches!(
        scene.apply_force(wall, Vec2::new(10.0, 0.0)),
        Err(StageError::UnsupportedOperation { .. })
    ));
    scene.apply_force(ball, Vec2::new(50.0, 0.0)).unwrap();
    assert_eq!(scene.velocity(ball).unwrap(), Vec2::ZERO);

    stage.tick(DT).unwrap();
    assert!(stage.scene().velocity(ball).unwrap().x > 0.0);
    assert_eq!(stage.scene().velocity(wall).unwrap(), Vec2::ZERO);
}

#[test]
fn circles_settle_on_a_floor_without_contact_churn() {
    init_logging();
    let mut stage = Stage::new(StageConfig::default().with_gravity(0.0, -9.81)).unwrap();
    let scene = stage.scene_mut();
    let floor = scene
        .add_actor(
            ActorDesc::rectangle(20.0, 1.0)
                .at(-10.0, -1.0)
                .with_profile(PhysicsProfile::default().with_restitution(0.0))
                .with_body_type(BodyType::Static),
        )
        .unwrap();
    let dead_ball = PhysicsProfile::default()
        .with_restitution(0.0)
        .with_body_type(BodyType::Dynamic);
    let left = scene
        .add_actor(ActorDesc::circle(1.0).at(-2.0, 1.0).with_profile(dead_ball.clone()))
        .unwrap();
    let right = scene
        .add_actor(ActorDesc::circle(1.0).at(2.0, 1.5).with_profile(dead_ball))
        .unwrap();

    let begins = Rc::new(Cell::new(0));
    let ends = Rc::new(Cell::new(0));
    let (b, e) = (begins.clone(), ends.clone());
    scene
        .add_collision_listener(
            CollisionTarget::Actor(floor),
            ContactCallbacks::new(
                move |_: &mut Scene, _: &CollisionEvent| -> anyhow::Result<()> {
                    b.set(b.get() + 1);
                    Ok(())
                },
                move |_: &mut Scene, _: &CollisionEvent| -> anyhow::Result<()> {
                    e.set(e.get() + 1);
                    Ok(())
                },
            ),
        )
        .unwrap();

    for _ in 0..180 {
        stage.tick(DT).unwrap();
    }
    assert!(begins.get() >= 2);
    let (begins_at_rest, ends_at_rest) = (begins.get(), ends.get());
    assert_eq!(begins_at_rest - ends_at_rest, 2);
    for _ in 0..120 {
        stage.tick(DT).unwrap();
    }
    assert_eq!(begins.get(), begins_at_rest);
    assert_eq!(ends.get(), ends_at_rest);

    let scene = stage.scene();
    for id in [left, right] {
        assert!(scene.position(id).unwrap().y.abs() < 0.05);
        assert!(scene.touching(id, floor));
        assert!(scene.is_grounded(id).unwrap());
    }
    assert_eq!(scene.touching_actors(floor).unwrap(), vec![left, right]);
    assert!(!scene.overlaps(left, right).unwrap());
}

#[test]
fn rope_holds_after_a_teleport() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let a = dynamic_ball(scene, 0.0, 0.0);
    let b = dynamic_ball(scene, 2.0, 0.0);
    let center = Vec2::new(0.5, 0.5);
    let rope = scene
        .create_joint(a, b, JointSpec::rope(center, center, 3.0))
        .unwrap();

    scene.move_by(a, Vec2::new(-6.0, 0.0)).unwrap();
    stage.tick(DT).unwrap();

    let (pa, pb) = stage.scene().joint_anchors(rope).unwrap();
    assert!(pa.distance(pb) <= 3.0 + 1e-3);
}

#[test]
fn failing_listener_does_not_stop_others() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let actor = scene.add_actor(ActorDesc::circle(1.0)).unwrap();
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    scene
        .on_frame(FrameScope::Actor(actor), |_, _| anyhow::bail!("broken listener"))
        .unwrap();
    scene
        .on_frame(FrameScope::Actor(actor), move |_, _| {
            c.set(c.get() + 1);
            Ok(())
        })
        .unwrap();

    stage.tick(DT).unwrap();
    stage.tick(DT).unwrap();
    assert_eq!(calls.get(), 2);
}

#[test]
fn listener_can_unregister_itself() {
    let mut stage = stage();
    let calls = Rc::new(Cell::new(0));
    let own_id: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
    let (c, me) = (calls.clone(), own_id.clone());
    let id = stage
        .scene_mut()
        .on_frame(FrameScope::Scene, move |scene, _| {
            c.set(c.get() + 1);
            if let Some(id) = me.get() {
                assert!(scene.remove_frame_listener(id));
            }
            Ok(())
        })
        .unwrap();
    own_id.set(Some(id));

    for _ in 0..3 {
        stage.tick(DT).unwrap();
    }
    assert_eq!(calls.get(), 1);
}

#[test]
fn frame_callbacks_run_in_scope_order() {
    let mut stage = stage();
    let order = Rc::new(RefCell::new(Vec::new()));
    let push = |label: &'static str| {
        let order = order.clone();
        move |_: &mut Scene, _: f32| -> anyhow::Result<()> {
            order.borrow_mut().push(label);
            Ok(())
        }
    };

    let scene = stage.scene_mut();
    let back = scene.add_layer(-1);
    let actor = scene.add_actor(ActorDesc::circle(1.0)).unwrap();
    let back_actor = scene.add_actor_to(back, ActorDesc::circle(1.0)).unwrap();
    scene.on_frame(FrameScope::Actor(actor), push("actor")).unwrap();
    scene
        .on_frame(FrameScope::Actor(back_actor), push("back actor"))
        .unwrap();
    scene
        .on_frame(FrameScope::Layer(scene.main_layer()), push("main layer"))
        .unwrap();
    scene.on_frame(FrameScope::Layer(back), push("back layer")).unwrap();
    scene.on_frame(FrameScope::Scene, push("scene")).unwrap();
    stage.on_frame(push("global"));

    stage.tick(DT).unwrap();
    assert_eq!(
        *order.borrow(),
        vec![
            "global",
            "scene",
            "back layer",
            "main layer",
            "back actor",
            "actor"
        ]
    );
}

#[test]
fn removing_an_actor_inside_a_collision_callback_is_safe() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let a = dynamic_ball(scene, 0.0, 0.0);
    let b = dynamic_ball(scene, 0.5, 0.0);
    let hits = Rc::new(Cell::new(0));
    let (h1, h2) = (hits.clone(), hits.clone());
    scene
        .on_collision(a, move |scene, event| {
            h1.set(h1.get() + 1);
            scene.remove_actor(event.colliding)?;
            Ok(())
        })
        .unwrap();
    scene
        .on_collision(b, move |_, _| {
            h2.set(h2.get() + 1);
            Ok(())
        })
        .unwrap();

    for _ in 0..5 {
        stage.tick(DT).unwrap();
    }
    assert_eq!(hits.get(), 1);
    assert!(!stage.scene().contains_actor(b));
    assert_eq!(
        stage
            .scene()
            .layer(stage.scene().main_layer())
            .unwrap()
            .body_count(),
        1
    );
}

#[test]
fn sensors_report_overlaps_without_contact_geometry() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let zone = scene
        .add_actor(
            ActorDesc::rectangle(4.0, 4.0)
                .at(-2.0, -2.0)
                .with_body_type(BodyType::Sensor),
        )
        .unwrap();
    let ball = dynamic_ball(scene, 0.0, 0.0);
    let events = Rc::new(RefCell::new(Vec::new()));
    let seen = events.clone();
    scene
        .on_collision(zone, move |_, event| {
            seen.borrow_mut().push(event.clone());
            Ok(())
        })
        .unwrap();

    stage.tick(DT).unwrap();
    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].colliding, ball);
    assert!(events[0].sensor);
    assert!(events[0].points.is_empty());
    // The sensor never pushed the ball.
    assert_eq!(stage.scene().velocity(ball).unwrap(), Vec2::ZERO);
}

#[test]
fn replacing_the_scene_releases_joints_and_clears_tasks() {
    let mut stage = stage();
    let released = Rc::new(Cell::new(0));
    let task_runs = Rc::new(Cell::new(0));
    let (r, t) = (released.clone(), task_runs.clone());
    let task: TaskId;
    {
        let scene = stage.scene_mut();
        let a = dynamic_ball(scene, 0.0, 0.0);
        let b = dynamic_ball(scene, 2.0, 0.0);
        let joint = scene
            .create_joint(a, b, JointSpec::weld(Vec2::ZERO, Vec2::ZERO))
            .unwrap();
        scene
            .add_release_listener(joint, move |_, _| {
                r.set(r.get() + 1);
                Ok(())
            })
            .unwrap();
        task = scene
            .repeat(DT, move |_, _| {
                t.set(t.get() + 1);
                Ok(())
            })
            .unwrap();
    }

    let next = stage.new_scene().unwrap();
    stage.replace_scene(next);
    assert_eq!(released.get(), 1);
    assert!(!stage.scene().is_task_active(task));
    assert_eq!(stage.scene().actor_count(), 0);

    stage.tick(DT).unwrap();
    assert_eq!(task_runs.get(), 0);
}

#[test]
fn parallax_layers_get_their_own_transform() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let hud = scene.add_layer(10);
    scene
        .layer_mut(hud)
        .unwrap()
        .set_parallax(Parallax::SCREEN_LOCKED);
    scene.add_actor_to(hud, ActorDesc::text("score", 1.0)).unwrap();
    scene.camera_mut().set_focus(Vec2::new(8.0, 2.0));

    stage.tick(DT).unwrap();
    let snapshot = stage.scene().snapshot();
    assert_eq!(snapshot.layers.len(), 2);
    let main = &snapshot.layers[0].transform;
    let top = &snapshot.layers[1].transform;
    assert_eq!(main.focus, Vec2::new(8.0, 2.0));
    assert_eq!(top.focus, Vec2::ZERO);
    assert_eq!(snapshot.layers[1].actors.len(), 1);
}

#[test]
fn world_fault_ends_the_tick_before_callbacks() {
    let mut stage = stage();
    let scene = stage.scene_mut();
    let layer = scene.main_layer();
    let broken = scene
        .add_actor(
            ActorDesc::circle(1.0)
                .with_fixtures(Vec::new())
                .with_body_type(BodyType::Dynamic),
        )
        .unwrap();
    let frames = Rc::new(Cell::new(0));
    let f = frames.clone();
    stage.on_frame(move |_, _| {
        f.set(f.get() + 1);
        Ok(())
    });

    stage.tick(DT).unwrap();
    assert_eq!(frames.get(), 1);

    stage
        .scene_mut()
        .set_velocity(broken, Vec2::new(f32::NAN, 0.0))
        .unwrap();
    let err = stage.tick(DT).unwrap_err();
    assert!(matches!(err, StageError::WorldFault { layer: l, .. } if l == layer));
    assert_eq!(frames.get(), 1);
    assert!(stage.scene().layer(layer).unwrap().fault().is_some());
    assert!(stage.scene().position(broken).unwrap().is_finite());

    // The faulted world stays frozen and the rest of the scene keeps running.
    stage.tick(DT).unwrap();
    assert_eq!(frames.get(), 2);
}
