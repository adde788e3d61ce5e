//! Environment isolation and lifecycle.

use framegraph::environment::{self, EnvironmentState};
use framegraph::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

fn manager() -> EnvironmentManager {
    EnvironmentManager::with_policy(Arc::new(ThreadLocalPolicy::new()))
}

fn small(manager: &EnvironmentManager) -> Environment {
    manager
        .create_environment_with(CoreConfig::new().with_threads(1))
        .unwrap()
}

#[test]
fn locals_are_isolated_between_environments() {
    let manager = manager();
    let first = small(&manager);
    let second = small(&manager);
    let counter = manager.local::<u32>("counter");

    {
        let _guard = first.enter().unwrap();
        counter.set(1).unwrap();
    }
    {
        let _guard = second.enter().unwrap();
        assert!(!counter.is_set());
        counter.set(2).unwrap();
    }
    {
        let _guard = first.enter().unwrap();
        assert_eq!(counter.get().unwrap(), 1);
    }
    {
        let _guard = second.enter().unwrap();
        assert_eq!(counter.get().unwrap(), 2);
    }
    assert_eq!(
        counter.get().unwrap_err(),
        EnvironmentError::NoCurrentEnvironment
    );
}

#[test]
fn nodes_run_on_the_current_environment_core() {
    let manager = manager();
    let env = small(&manager);
    let _guard = env.enter().unwrap();

    let core = manager.current_core().unwrap();
    let mut args = PropertyMap::new();
    args.set_int("format", Preset::Gray8.id().0 as i64).unwrap();
    args.set_int("width", 4).unwrap();
    args.set_int("height", 4).unwrap();
    args.set("color", vec![42.0]).unwrap();
    let clip = core.invoke("BlankClip", &args).unwrap();
    assert!(Core::ptr_eq(&clip.core(), &env.core().unwrap()));
    assert_eq!(clip.get_frame(0).unwrap().plane::<u8>(0).unwrap().get(1, 1), 42);
}

#[test]
fn destroy_callbacks_hold_weak_references() {
    let manager = manager();
    let env = small(&manager);
    let resource = Arc::new(AtomicUsize::new(0));
    let weak: Weak<AtomicUsize> = Arc::downgrade(&resource);
    env.on_destroy(move || {
        if let Some(resource) = weak.upgrade() {
            resource.fetch_add(1, Ordering::SeqCst);
        }
    })
    .unwrap();

    assert!(env.destroy());
    assert_eq!(resource.load(Ordering::SeqCst), 1);
    assert_eq!(Arc::strong_count(&resource), 1);
    assert_eq!(env.state(), EnvironmentState::Destroyed);
}

#[test]
fn each_thread_can_use_its_own_environment() {
    let manager = manager();
    let handles: Vec<_> = (0..4u32)
        .map(|i| {
            let manager = manager.clone();
            let env = small(&manager);
            std::thread::spawn(move || {
                let value = manager.local::<u32>("value");
                let _guard = env.enter().unwrap();
                value.set(i).unwrap();
                std::thread::yield_now();
                assert_eq!(manager.current().unwrap().id(), env.id());
                value.get().unwrap()
            })
        })
        .collect();
    let results: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![0, 1, 2, 3]);
}

#[test]
fn global_manager_has_a_policy() {
    let manager = environment::global();
    assert!(manager.has_policy());
    let env = manager.create_environment().unwrap();
    {
        let _guard = env.enter().unwrap();
        assert_eq!(manager.current().unwrap().id(), env.id());
    }
    assert!(env.destroy());
    assert!(!env.destroy());
}
