use std::{
    sync::{
        Arc, Barrier, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use scene_ngin::{
    context::Device,
    error::EngineError,
    resources::{ResourceDictionary, ResourceKey},
};

use crate::common::test_utils::{Dummy, DummyFactory};

mod common;

type Dummies = ResourceDictionary<ResourceKey, Dummy>;

fn cube() -> ResourceKey {
    ResourceKey::geometry("cube")
}

#[test]
fn should_return_identical_instance_for_repeated_requests() {
    let dummies = DummyFactory::new();
    let dictionary = Dummies::new();
    dictionary.register(cube(), dummies.factory("cube"));
    let device = Device::new("test");

    let first = dictionary.get(&device, &cube()).unwrap();
    let second = dictionary.get(&device, &cube()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(dummies.load_count(), 1);
    assert_eq!(first.label(), "geometry:cube");
    assert_eq!(first.device(), device.id());
}

#[test]
fn should_load_once_per_device() {
    let dummies = DummyFactory::new();
    let dictionary = Dummies::new();
    dictionary.register(cube(), dummies.factory("cube"));
    let left = Device::new("left");
    let right = Device::new("right");

    let on_left = dictionary.get(&left, &cube()).unwrap();
    let on_right = dictionary.get(&right, &cube()).unwrap();

    assert!(!Arc::ptr_eq(&on_left, &on_right));
    assert_eq!(dummies.load_count(), 2);
    assert_eq!(dictionary.loaded_count(&left), 1);
    assert_eq!(dictionary.loaded_count(&right), 1);
}

#[test]
fn should_fail_for_unregistered_keys() {
    let dictionary = Dummies::new();
    let device = Device::new("test");

    let result = dictionary.get(&device, &ResourceKey::texture("missing"));

    assert!(matches!(result, Err(EngineError::UnknownResource(key)) if key == "texture:missing"));
}

#[test]
fn should_unload_released_resources_on_flush_and_reload_fresh() {
    let dummies = DummyFactory::new();
    let dictionary = Dummies::new();
    dictionary.register(cube(), dummies.factory("cube"));
    let device = Device::new("test");
    dictionary.retain(&cube());
    let first = dictionary.get(&device, &cube()).unwrap();

    assert_eq!(dictionary.release(&cube()).unwrap(), 0);
    assert!(dictionary.needs_unload(&device, &cube()));
    // marked but still cached until the device flushes
    assert!(Arc::ptr_eq(&first, &dictionary.get(&device, &cube()).unwrap()));
    assert!(dummies.unloaded().is_empty());

    assert_eq!(dictionary.flush(&device), 1);
    assert_eq!(dummies.unloaded(), vec!["cube".to_string()]);
    assert!(first.is_disposed());

    let second = dictionary.get(&device, &cube()).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.get().unwrap().generation, 2);
}

#[test]
fn should_keep_shared_resources_while_referenced() {
    let dummies = DummyFactory::new();
    let dictionary = Dummies::new();
    dictionary.register(cube(), dummies.factory("cube"));
    let device = Device::new("test");
    dictionary.retain(&cube());
    dictionary.retain(&cube());
    dictionary.get(&device, &cube()).unwrap();

    assert_eq!(dictionary.release(&cube()).unwrap(), 1);
    assert_eq!(dictionary.flush(&device), 0);

    assert_eq!(dictionary.ref_count(&cube()), 1);
    assert_eq!(dictionary.loaded_count(&device), 1);
}

#[test]
fn should_clear_unload_mark_when_retained_again() {
    let dummies = DummyFactory::new();
    let dictionary = Dummies::new();
    dictionary.register(cube(), dummies.factory("cube"));
    let device = Device::new("test");
    dictionary.retain(&cube());
    dictionary.get(&device, &cube()).unwrap();

    dictionary.release(&cube()).unwrap();
    dictionary.retain(&cube());

    assert!(!dictionary.needs_unload(&device, &cube()));
    assert_eq!(dictionary.flush(&device), 0);
    assert_eq!(dummies.load_count(), 1);
}

#[test]
fn should_flush_explicitly_marked_resources_of_one_device_only() {
    let dummies = DummyFactory::new();
    let dictionary = Dummies::new();
    dictionary.register(cube(), dummies.factory("cube"));
    let left = Device::new("left");
    let right = Device::new("right");
    dictionary.get(&left, &cube()).unwrap();
    dictionary.get(&right, &cube()).unwrap();

    assert!(dictionary.mark_for_unload(&left, &cube()));
    assert!(!dictionary.mark_for_unload(&left, &ResourceKey::material("unknown")));

    assert_eq!(dictionary.flush(&right), 0);
    assert_eq!(dictionary.flush(&left), 1);
    assert_eq!(dictionary.loaded_count(&left), 0);
    assert_eq!(dictionary.loaded_count(&right), 1);
}

#[test]
fn should_refuse_access_to_disposed_handles() {
    let dummies = DummyFactory::new();
    let dictionary = Dummies::new();
    dictionary.register(cube(), dummies.factory("cube"));
    let device = Device::new("test");
    let handle = dictionary.get(&device, &cube()).unwrap();
    assert_eq!(handle.get().unwrap().label, "cube");

    dictionary.unload_all(&device);

    assert!(matches!(handle.get(), Err(EngineError::Disposed(_))));
    assert!(dictionary.peek(&device, &cube()).is_none());
}

#[test]
fn should_not_cache_failed_loads() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let dictionary = Dummies::new();
    let dummies = DummyFactory::new();
    let factory = dummies.factory("flaky");
    dictionary.register(cube(), move |device: &Device| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("device lost");
        }
        factory(device)
    });
    let device = Device::new("test");

    let failed = dictionary.get(&device, &cube());
    let loaded = dictionary.get(&device, &cube());

    assert!(matches!(failed, Err(EngineError::ResourceLoad { ref key, .. }) if key == "geometry:cube"));
    assert!(loaded.is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn should_detect_factories_requesting_their_own_key() {
    let dictionary = Arc::new(Dummies::new());
    let weak: Weak<Dummies> = Arc::downgrade(&dictionary);
    let dummies = DummyFactory::new();
    let factory = dummies.factory("recursive");
    dictionary.register(cube(), move |device: &Device| {
        if let Some(dictionary) = weak.upgrade() {
            dictionary.get(device, &cube())?;
        }
        factory(device)
    });
    let device = Device::new("test");

    let result = dictionary.get(&device, &cube());

    let message = format!("{}", result.unwrap_err());
    assert!(message.contains("was requested while the same thread was loading it"), "{}", message);
    assert_eq!(dictionary.loaded_count(&device), 0);
}

#[test]
fn should_load_once_under_concurrent_first_requests() {
    let dummies = DummyFactory::new();
    let dictionary = Arc::new(Dummies::new());
    let factory = dummies.factory("slow");
    dictionary.register(cube(), move |device: &Device| {
        thread::sleep(Duration::from_millis(20));
        factory(device)
    });
    let device = Arc::new(Device::new("test"));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dictionary = dictionary.clone();
            let device = device.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                dictionary.get(&device, &cube()).unwrap()
            })
        })
        .collect();
    let loaded: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(dummies.load_count(), 1);
    assert!(loaded.iter().all(|handle| Arc::ptr_eq(handle, &loaded[0])));
}

#[test]
fn should_unload_dependents_before_their_dependencies() {
    let dummies = DummyFactory::new();
    let dictionary = Arc::new(Dummies::new());
    let weak = Arc::downgrade(&dictionary);
    let material = ResourceKey::material("brick");
    let texture = ResourceKey::texture("brick");
    dictionary.register(texture.clone(), dummies.factory("texture"));
    let material_factory = dummies.factory("material");
    let dependency = texture.clone();
    dictionary.register(material.clone(), move |device: &Device| {
        if let Some(dictionary) = weak.upgrade() {
            dictionary.get(device, &dependency)?;
        }
        material_factory(device)
    });
    let device = Device::new("test");

    dictionary.get(&device, &material).unwrap();
    assert_eq!(dictionary.unload_all(&device), 2);

    assert_eq!(dummies.unloaded(), vec!["material".to_string(), "texture".to_string()]);
}

#[test]
fn should_report_more_releases_than_retains() {
    let dictionary = Dummies::new();
    dictionary.retain(&cube());
    dictionary.release(&cube()).unwrap();

    let result = dictionary.release(&cube());

    assert!(matches!(result, Err(EngineError::ResourceRefUnderflow(_))));
}

#[test]
fn should_load_ad_hoc_factories_once() {
    let dictionary = Dummies::new();
    let dummies = DummyFactory::new();
    let device = Device::new("test");
    let key = ResourceKey::geometry("generated");

    let first = dictionary
        .get_or_load_with(&device, &key, dummies.factory("generated"))
        .unwrap();
    let second = dictionary
        .get_or_load_with(&device, &key, dummies.factory("other"))
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.get().unwrap().label, "generated");
    assert!(!dictionary.is_registered(&key));
}

#[test]
fn should_mark_resources_released_while_loading() {
    let dummies = DummyFactory::new();
    let dictionary = Arc::new(Dummies::new());
    let started = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));
    let factory = dummies.factory("cube");
    let (entered, proceed) = (started.clone(), resume.clone());
    dictionary.register(cube(), move |device: &Device| {
        entered.wait();
        proceed.wait();
        factory(device)
    });
    let device = Arc::new(Device::new("test"));
    dictionary.retain(&cube());

    let loader = {
        let dictionary = dictionary.clone();
        let device = device.clone();
        thread::spawn(move || dictionary.get(&device, &cube()).unwrap())
    };
    started.wait();
    assert_eq!(dictionary.release(&cube()).unwrap(), 0);
    resume.wait();
    let handle = loader.join().unwrap();

    assert!(dictionary.needs_unload(&device, &cube()));
    assert_eq!(dictionary.flush(&device), 1);
    assert!(handle.is_disposed());
    assert_eq!(dictionary.ref_count(&cube()), 0);
}

#[test]
fn should_keep_marks_in_step_with_concurrent_retains_and_releases() {
    let dummies = DummyFactory::new();
    let dictionary = Arc::new(Dummies::new());
    dictionary.register(cube(), dummies.factory("cube"));
    let device = Device::new("test");
    dictionary.get(&device, &cube()).unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dictionary = dictionary.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..500 {
                    dictionary.retain(&cube());
                    dictionary.release(&cube()).unwrap();
                }
                dictionary.retain(&cube());
            })
        })
        .collect();
    handles.into_iter().for_each(|h| h.join().unwrap());

    assert_eq!(dictionary.ref_count(&cube()), 8);
    assert!(!dictionary.needs_unload(&device, &cube()));
    assert_eq!(dictionary.flush(&device), 0);
    assert_eq!(dummies.load_count(), 1);
}
