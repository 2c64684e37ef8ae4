mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use cgmath::{Deg, Quaternion, Rotation3, Vector3};
use common::test_utils::{RecordingSink, assert_close, assert_vec_close};
use scene_ngin::{
    animation::{AnimationSequence, SequenceState, Sequencer},
    context::EngineConfig,
    data_structures::{
        instance::Instance,
        scene_graph::{Color, SceneObject},
    },
    flow::EngineBuilder,
};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn position(object: &SceneObject) -> Vector3<f32> {
    object.local_transform().position
}

#[test]
fn should_end_steps_exactly_on_their_target() {
    let target = Quaternion::from_angle_y(Deg(90.0));
    let mut sequencer = Sequencer::new(
        AnimationSequence::new()
            .move_to((10.0, 0.0, 0.0), ms(300))
            .rotate_to(target, ms(300))
            .scale_to((2.0, 3.0, 4.0), ms(300)),
    );
    let mut object = SceneObject::new("mover");

    for now in (0..=900).step_by(7) {
        sequencer.tick(ms(now), &mut object);
    }
    sequencer.tick(ms(900), &mut object);

    assert_eq!(sequencer.state(), SequenceState::Finished);
    assert_eq!(position(&object), Vector3::new(10.0, 0.0, 0.0));
    assert_eq!(object.local_transform().rotation, target);
    assert_eq!(object.local_transform().scale, Vector3::new(2.0, 3.0, 4.0));
}

#[test]
fn should_interpolate_from_value_at_step_start() {
    let mut sequencer = Sequencer::new(AnimationSequence::new().move_to((10.0, 0.0, 0.0), ms(1000)));
    let mut object =
        SceneObject::new("mover").with_transform(Instance::new().with_position((2.0, 0.0, 0.0)));

    sequencer.tick(ms(0), &mut object);
    assert_eq!(sequencer.state(), SequenceState::Running(0));
    assert_vec_close(position(&object), Vector3::new(2.0, 0.0, 0.0));

    sequencer.tick(ms(500), &mut object);
    assert_vec_close(position(&object), Vector3::new(6.0, 0.0, 0.0));

    sequencer.tick(ms(750), &mut object);
    assert_vec_close(position(&object), Vector3::new(8.0, 0.0, 0.0));
}

#[test]
fn should_start_on_first_tick() {
    let mut sequencer = Sequencer::new(AnimationSequence::new().move_to((10.0, 0.0, 0.0), ms(1000)));
    let mut object = SceneObject::new("late");
    assert_eq!(sequencer.state(), SequenceState::Idle);

    sequencer.tick(ms(5000), &mut object);
    sequencer.tick(ms(5500), &mut object);

    assert_vec_close(position(&object), Vector3::new(5.0, 0.0, 0.0));
}

#[test]
fn should_carry_surplus_time_into_next_step() {
    let mut sequencer = Sequencer::new(
        AnimationSequence::new()
            .move_to((10.0, 0.0, 0.0), ms(1000))
            .move_to((10.0, 10.0, 0.0), ms(1000)),
    );
    let mut object = SceneObject::new("mover");

    sequencer.tick(ms(0), &mut object);
    sequencer.tick(ms(1500), &mut object);

    assert_eq!(sequencer.state(), SequenceState::Running(1));
    assert_vec_close(position(&object), Vector3::new(10.0, 5.0, 0.0));
}

#[test]
fn should_skip_several_steps_in_one_tick() {
    let mut sequencer = Sequencer::new(
        AnimationSequence::new()
            .move_to((1.0, 0.0, 0.0), ms(100))
            .wait(ms(100))
            .move_to((1.0, 1.0, 0.0), ms(100))
            .move_to((1.0, 1.0, 1.0), ms(100)),
    );
    let mut object = SceneObject::new("mover");

    sequencer.tick(ms(0), &mut object);
    sequencer.tick(ms(350), &mut object);

    assert_eq!(sequencer.state(), SequenceState::Running(3));
    assert_vec_close(position(&object), Vector3::new(1.0, 1.0, 0.5));
}

#[test]
fn should_wait_then_invoke_callback_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut sequencer = Sequencer::new(
        AnimationSequence::new()
            .wait(ms(1000))
            .invoke(move |object: &mut SceneObject| {
                counter.fetch_add(1, Ordering::SeqCst);
                object.set_color(Color::RED);
            })
            .move_to((0.0, 4.0, 0.0), ms(1000)),
    );
    let mut object = SceneObject::new("waiter");

    sequencer.tick(ms(0), &mut object);
    sequencer.tick(ms(999), &mut object);
    assert_eq!(sequencer.state(), SequenceState::Waiting(0));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(position(&object), Vector3::new(0.0, 0.0, 0.0));

    sequencer.tick(ms(1500), &mut object);
    sequencer.tick(ms(1600), &mut object);
    assert_eq!(sequencer.state(), SequenceState::Running(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(object.color(), Color::RED);

    sequencer.tick(ms(2000), &mut object);
    sequencer.tick(ms(2100), &mut object);
    assert_eq!(sequencer.state(), SequenceState::Finished);
    assert_eq!(position(&object), Vector3::new(0.0, 4.0, 0.0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn should_replay_looped_sequences() {
    let mut sequencer = Sequencer::new(
        AnimationSequence::new()
            .move_to((10.0, 0.0, 0.0), ms(1000))
            .move_to((0.0, 0.0, 0.0), ms(1000))
            .looped(),
    );
    let mut object = SceneObject::new("pendulum");

    sequencer.tick(ms(0), &mut object);
    sequencer.tick(ms(2500), &mut object);
    assert_eq!(sequencer.state(), SequenceState::Running(0));
    assert_vec_close(position(&object), Vector3::new(5.0, 0.0, 0.0));

    sequencer.tick(ms(7250), &mut object);
    assert_eq!(sequencer.state(), SequenceState::Running(1));
    assert_vec_close(position(&object), Vector3::new(7.5, 0.0, 0.0));
}

#[test]
fn should_run_instant_loops_once_per_tick() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut sequencer = Sequencer::new(
        AnimationSequence::new()
            .invoke(move |_: &mut SceneObject| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .looped(),
    );
    let mut object = SceneObject::new("spinner");

    sequencer.tick(ms(0), &mut object);
    sequencer.tick(ms(0), &mut object);
    sequencer.tick(ms(16), &mut object);

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_ne!(sequencer.state(), SequenceState::Finished);
}

#[test]
fn should_finish_empty_sequences_immediately() {
    let mut sequencer = Sequencer::new(AnimationSequence::new());
    let mut object = SceneObject::new("still");

    sequencer.tick(ms(10), &mut object);

    assert_eq!(sequencer.state(), SequenceState::Finished);
    assert_eq!(object.local_transform(), &Instance::new());
}

#[test]
fn should_animate_scene_objects_from_mutation() {
    let sink = RecordingSink::new();
    let mut engine = EngineBuilder::<()>::new(EngineConfig::default())
        .with_sink(sink.clone())
        .build()
        .unwrap();
    let object = SceneObject::new("mover");
    let id = object.id();
    engine.manipulate(move |m| {
        m.add(object)?;
        m.start_animation(id, AnimationSequence::new().move_to((0.0, 0.0, 8.0), ms(1000)))?;
        Ok(())
    });

    engine.render_frame_at(ms(100));
    assert_eq!(engine.scene().animation_state(id), Some(SequenceState::Running(0)));

    engine.render_frame_at(ms(600));
    assert_close(engine.scene().get(id).unwrap().world_transform().position.z, 4.0);
    assert_close(sink.last().layer("default").translations[0][2], 4.0);

    engine.render_frame_at(ms(1100));
    assert_eq!(engine.scene().animation_state(id), Some(SequenceState::Finished));
    assert_eq!(sink.last().layer("default").translations[0], [0.0, 0.0, 8.0]);

    let stopped = engine
        .mutations()
        .submit_with(move |m| m.stop_animation(id).map_err(Into::into));
    engine.render_frame_at(ms(1200));
    assert!(stopped.wait_blocking().unwrap().0);
    assert_eq!(engine.scene().animation_state(id), None);
}
