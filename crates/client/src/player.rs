//! Avatar adapters over the world driver.
//!
//! The local player and a remote player share the get/set property
//! surface but move through incompatible primitives, so they live in a
//! sum type: only the remote variant embeds a translator.

use std::sync::Arc;

use friendlink::{pack_string, unpack_string, Location, PropertyStream, PropertyTag};

use crate::driver::{ProxyRef, WorldDriver};
use crate::translator::Translator;

pub enum Avatar {
    Local(LocalPlayer),
    Remote(RemotePlayer),
}

impl Avatar {
    pub fn apply_stream(&self, stream: &PropertyStream) {
        match self {
            Avatar::Local(player) => player.apply_stream(stream),
            Avatar::Remote(player) => player.apply_stream(stream),
        }
    }

    pub fn matches(&self, other: ProxyRef) -> bool {
        match self {
            Avatar::Local(player) => player.matches(other),
            Avatar::Remote(player) => player.matches(other),
        }
    }

    /// Translation control only means something for remote avatars; the
    /// local player moves itself.
    pub fn mark_translation_complete(&self) {
        if let Avatar::Remote(player) = self {
            player.mark_translation_complete();
        }
    }

    pub fn stop_translating(&self) {
        if let Avatar::Remote(player) = self {
            player.stop_translating();
        }
    }

    pub fn start_translating(&self) {
        if let Avatar::Remote(player) = self {
            player.start_translating();
        }
    }
}

/// Samples the host-side player character and emits property streams.
pub struct LocalPlayer {
    driver: Arc<dyn WorldDriver>,
}

impl LocalPlayer {
    pub fn new(driver: Arc<dyn WorldDriver>) -> Self {
        Self { driver }
    }

    /// Packs the requested subset of attributes, sampled now.
    pub fn properties(&self, tags: &[PropertyTag]) -> PropertyStream {
        let mut stream = PropertyStream::new();
        for tag in tags {
            match tag {
                PropertyTag::Name => {
                    stream.push(&pack_string(PropertyTag::Name, &self.driver.local_name()))
                }
                PropertyTag::CellName => stream.push(&pack_string(
                    PropertyTag::CellName,
                    &self.driver.local_cell_name(),
                )),
                PropertyTag::WorldSpaceName => stream.push(&pack_string(
                    PropertyTag::WorldSpaceName,
                    &self.driver.local_world_space_name(),
                )),
                PropertyTag::Location => stream.push(&self.driver.local_location().to_property()),
                PropertyTag::LoadedState => {
                    stream.push(&self.driver.local_loaded_state().to_property())
                }
                other => log::debug!("cannot sample property {other:?} from the local player"),
            }
        }
        stream
    }

    /// Dispatches known updates to the driver; unknown tags pass by.
    pub fn apply_stream(&self, stream: &PropertyStream) {
        let proxy = self.driver.local_proxy();
        apply_to(&*self.driver, proxy, stream, |location| {
            self.driver.change_cell_to(proxy, location);
        });
    }

    pub fn matches(&self, other: ProxyRef) -> bool {
        self.driver.local_proxy() == other
    }
}

/// A peer's avatar: a placed proxy object plus the translator that
/// drives it through incoming locations.
pub struct RemotePlayer {
    driver: Arc<dyn WorldDriver>,
    proxy: ProxyRef,
    translator: Option<Translator>,
}

impl RemotePlayer {
    pub fn new(driver: Arc<dyn WorldDriver>) -> Self {
        let proxy = driver.place_proxy();
        let translator = Translator::new(Arc::clone(&driver), proxy);
        Self {
            driver,
            proxy,
            translator: Some(translator),
        }
    }

    pub fn proxy(&self) -> ProxyRef {
        self.proxy
    }

    pub fn matches(&self, other: ProxyRef) -> bool {
        self.proxy == other
    }

    pub fn apply_stream(&self, stream: &PropertyStream) {
        let translator = self.translator.as_ref().expect("translator alive");
        apply_to(&*self.driver, self.proxy, stream, |location| {
            translator.push(location);
        });
    }

    pub fn mark_translation_complete(&self) {
        if let Some(translator) = &self.translator {
            translator.mark_complete();
        }
    }

    pub fn stop_translating(&self) {
        if let Some(translator) = &self.translator {
            translator.stop();
        }
    }

    pub fn start_translating(&self) {
        if let Some(translator) = &self.translator {
            translator.start();
        }
    }
}

impl Drop for RemotePlayer {
    fn drop(&mut self) {
        // Join the translator before the proxy object goes away.
        self.translator.take();
        self.driver.remove_proxy(self.proxy);
    }
}

fn apply_to(
    driver: &dyn WorldDriver,
    proxy: ProxyRef,
    stream: &PropertyStream,
    mut set_location: impl FnMut(&Location),
) {
    for property in stream {
        let property = match property {
            Ok(property) => property,
            Err(e) => {
                log::error!("property stream aborted: {e}");
                return;
            }
        };
        match property.tag {
            PropertyTag::Name => driver.set_name(proxy, &unpack_string(&property)),
            PropertyTag::Location => match Location::from_property(&property) {
                Ok(location) => set_location(&location),
                Err(e) => log::warn!("bad location property: {e}"),
            },
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use friendlink::LoadedState;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDriver {
        next_proxy: AtomicU64,
        names: Mutex<Vec<(ProxyRef, String)>>,
        removed: Mutex<Vec<ProxyRef>>,
    }

    impl WorldDriver for RecordingDriver {
        fn place_proxy(&self) -> ProxyRef {
            self.next_proxy.fetch_add(1, Ordering::SeqCst) + 100
        }
        fn remove_proxy(&self, proxy: ProxyRef) {
            self.removed.lock().unwrap().push(proxy);
        }
        fn set_name(&self, proxy: ProxyRef, name: &str) {
            self.names.lock().unwrap().push((proxy, name.to_string()));
        }
        fn translate_to(&self, _proxy: ProxyRef, _target: &Location, _speed: f32) {}
        fn change_cell_to(&self, _proxy: ProxyRef, _target: &Location) {}
        fn cell_attached(&self, _target: &Location) -> bool {
            true
        }
        fn is_interior(&self, _cell_id: u32) -> bool {
            false
        }
        fn local_proxy(&self) -> ProxyRef {
            7
        }
        fn local_name(&self) -> String {
            "Dova".to_string()
        }
        fn local_cell_name(&self) -> String {
            "Riverwood".to_string()
        }
        fn local_world_space_name(&self) -> String {
            "Tamriel".to_string()
        }
        fn local_location(&self) -> Location {
            Location::new(Some(1), Some(2), [10.0, 20.0, 30.0])
        }
        fn local_loaded_state(&self) -> LoadedState {
            LoadedState { fields: [9; 8] }
        }
    }

    #[test]
    fn local_snapshot_packs_requested_tags_in_order() {
        let driver = Arc::new(RecordingDriver::default());
        let player = LocalPlayer::new(driver);

        let stream = player.properties(&[
            PropertyTag::Name,
            PropertyTag::WorldSpaceName,
            PropertyTag::CellName,
            PropertyTag::Location,
        ]);
        let properties: Vec<_> = stream.iter().map(|p| p.unwrap()).collect();
        assert_eq!(properties.len(), 4);
        assert_eq!(unpack_string(&properties[0]), "Dova");
        assert_eq!(unpack_string(&properties[1]), "Tamriel");
        assert_eq!(unpack_string(&properties[2]), "Riverwood");
        let location = Location::from_property(&properties[3]).unwrap();
        assert_eq!(location.position(), [10.0, 20.0, 30.0]);
    }

    #[test]
    fn remote_apply_sets_name_and_ignores_unhandled_tags() {
        let driver = Arc::new(RecordingDriver::default());
        let player = RemotePlayer::new(Arc::clone(&driver) as Arc<dyn WorldDriver>);
        let proxy = player.proxy();

        let mut stream = PropertyStream::new();
        stream.push(&pack_string(PropertyTag::Name, "Amber"));
        stream.push(&pack_string(PropertyTag::CellName, "ignored"));
        player.apply_stream(&stream);

        assert_eq!(
            driver.names.lock().unwrap().as_slice(),
            &[(proxy, "Amber".to_string())]
        );
    }

    #[test]
    fn dropping_a_remote_player_removes_its_proxy() {
        let driver = Arc::new(RecordingDriver::default());
        let proxy = {
            let player = RemotePlayer::new(Arc::clone(&driver) as Arc<dyn WorldDriver>);
            player.proxy()
        };
        assert_eq!(driver.removed.lock().unwrap().as_slice(), &[proxy]);
    }

    #[test]
    fn avatar_matches_by_variant() {
        let driver = Arc::new(RecordingDriver::default());
        let local = Avatar::Local(LocalPlayer::new(
            Arc::clone(&driver) as Arc<dyn WorldDriver>
        ));
        assert!(local.matches(7));
        assert!(!local.matches(8));
    }
}
