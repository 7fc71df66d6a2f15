use anyhow::Result;
use stage2d::{
    ActorDesc, BodyType, CameraFollow, FrameScope, JointSpec, PhysicsProfile, Stage, StageConfig,
    Vec2,
};

/// Headless demo: crates rain onto a floor, a sensor zone counts arrivals and
/// a pendulum swings on a rope. Run with `RUST_LOG=debug` for more detail.
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = StageConfig::default()
        .with_gravity(0.0, -9.81)
        .with_default_profile(PhysicsProfile::default().with_friction(0.4));
    let mut stage = Stage::new(config)?;
    let scene = stage.scene_mut();

    scene.add_actor(
        ActorDesc::rectangle(30.0, 1.0)
            .at(-15.0, -1.0)
            .with_name("floor")
            .with_body_type(BodyType::Static),
    )?;
    let zone = scene.add_actor(
        ActorDesc::rectangle(4.0, 2.0)
            .at(4.0, 0.0)
            .with_name("zone")
            .with_body_type(BodyType::Sensor),
    )?;
    scene.on_collision(zone, |scene, event| {
        let name = scene.actor(event.colliding)?.name().unwrap_or("?").to_owned();
        log::info!("{name} entered the zone");
        Ok(())
    })?;

    let anchor = scene.add_actor(
        ActorDesc::circle(0.2)
            .at(-6.0, 8.0)
            .with_body_type(BodyType::Static),
    )?;
    let bob = scene.add_actor(
        ActorDesc::circle(0.8)
            .at(-3.0, 8.0)
            .with_name("bob")
            .with_body_type(BodyType::Dynamic),
    )?;
    scene.create_joint(
        anchor,
        bob,
        JointSpec::rope(Vec2::new(0.1, 0.1), Vec2::new(0.4, 0.4), 3.0),
    )?;
    scene.camera_mut().follow(CameraFollow::new(bob).with_smoothing(0.1));

    scene.repeat_times(0.5, 12, |scene, run| {
        let x = -4.0 + (run % 6) as f32 * 1.8;
        scene.add_actor(
            ActorDesc::rectangle(1.0, 1.0)
                .at(x, 10.0)
                .with_name(format!("crate-{run}"))
                .with_body_type(BodyType::Dynamic),
        )?;
        Ok(())
    })?;

    scene.on_frame(FrameScope::Scene, |scene, _| {
        let sleeping = scene
            .actors()
            .filter(|actor| actor.state() == stage2d::BodyState::Dynamic)
            .filter(|actor| scene.is_sleeping(actor.id()).unwrap_or(false))
            .count();
        log::trace!("{sleeping} bodies asleep");
        Ok(())
    })?;

    let dt = 1.0 / stage.config().frame_rate;
    for _ in 0..600 {
        stage.tick(dt)?;
    }

    let snapshot = stage.scene().snapshot();
    for layer in &snapshot.layers {
        for actor in &layer.actors {
            log::debug!(
                "{} {:?} at ({:.2}, {:.2})",
                actor.id,
                actor.state,
                actor.position.x,
                actor.position.y
            );
        }
    }
    log::info!(
        "simulated {:.1}s over {} frames, {} actors",
        stage.elapsed_time().as_secs_f32(),
        stage.frame(),
        stage.scene().actor_count()
    );
    Ok(())
}
