#![forbid(unsafe_code)]

//! Rendering layers and panel assignment.
//!
//! Layers are ordered buckets that panels are parented to. The relative order
//! is fixed by [`LayerKind`]: `Background < Normal < Popup < System < Top <
//! Debug`. Each layer's render order is a pure function of its kind unless a
//! host overrides it, which is the only way two layers can collide (see
//! [`LayerRegistry::detect_order_conflicts`]).
//!
//! The registry creates layers lazily the first time a panel is assigned to
//! them and keeps them in enum order.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::lifecycle::InstanceId;

/// Spacing between default render orders, leaving room for overrides.
pub const RENDER_ORDER_STEP: i32 = 1000;

/// Ordered rendering layer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LayerKind {
    /// Full-screen backdrops.
    Background,
    /// Regular screens (default).
    #[default]
    Normal,
    /// Dialogs and popups.
    Popup,
    /// System prompts (errors, confirmations).
    System,
    /// Always-on-top overlays such as toasts and loading veils.
    Top,
    /// Debug overlays.
    Debug,
}

impl LayerKind {
    /// All kinds in render order.
    pub const ALL: [LayerKind; 6] = [
        Self::Background,
        Self::Normal,
        Self::Popup,
        Self::System,
        Self::Top,
        Self::Debug,
    ];

    /// Position in the fixed order.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Background => 0,
            Self::Normal => 1,
            Self::Popup => 2,
            Self::System => 3,
            Self::Top => 4,
            Self::Debug => 5,
        }
    }

    /// Render order used when no override is set.
    #[must_use]
    pub const fn default_render_order(self) -> i32 {
        self.index() as i32 * RENDER_ORDER_STEP
    }

    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Normal => "normal",
            Self::Popup => "popup",
            Self::System => "system",
            Self::Top => "top",
            Self::Debug => "debug",
        }
    }
}

/// A rendering layer and the number of panels parented to it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Layer {
    pub kind: LayerKind,
    pub render_order: i32,
    pub panel_count: usize,
}

/// Registry of layers and the instance -> layer assignment.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: BTreeMap<LayerKind, Layer>,
    assignments: AHashMap<InstanceId, LayerKind>,
    overrides: AHashMap<LayerKind, i32>,
}

impl LayerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the layer for `kind`, creating it if it does not exist yet.
    pub fn get_or_create_layer(&mut self, kind: LayerKind) -> &Layer {
        self.layer_entry(kind)
    }

    /// Look up a layer without creating it.
    #[must_use]
    pub fn layer(&self, kind: LayerKind) -> Option<&Layer> {
        self.layers.get(&kind)
    }

    /// Assign an instance to a layer and return the layer's render order.
    ///
    /// Reassigning an instance moves it: the previous layer's count drops.
    pub fn assign_panel(&mut self, instance: InstanceId, kind: LayerKind) -> i32 {
        match self.assignments.insert(instance, kind) {
            Some(previous) if previous == kind => return self.layer_entry(kind).render_order,
            Some(previous) => self.decrement(previous),
            None => {}
        }
        let layer = self.layer_entry(kind);
        layer.panel_count += 1;
        layer.render_order
    }

    /// Remove an instance's assignment. Returns the layer it was on.
    pub fn release_panel(&mut self, instance: InstanceId) -> Option<LayerKind> {
        let kind = self.assignments.remove(&instance)?;
        self.decrement(kind);
        Some(kind)
    }

    /// Layer an instance is currently assigned to.
    #[must_use]
    pub fn layer_of(&self, instance: InstanceId) -> Option<LayerKind> {
        self.assignments.get(&instance).copied()
    }

    /// Number of panels on `kind` (zero if the layer was never created).
    #[must_use]
    pub fn panel_count_of(&self, kind: LayerKind) -> usize {
        self.layers.get(&kind).map_or(0, |l| l.panel_count)
    }

    /// Override a layer's render order. Creates the layer if needed.
    pub fn set_render_order(&mut self, kind: LayerKind, order: i32) {
        self.overrides.insert(kind, order);
        self.layer_entry(kind).render_order = order;
    }

    /// Groups of layers that share a render order, each group in enum order.
    #[must_use]
    pub fn detect_order_conflicts(&self) -> Vec<Vec<LayerKind>> {
        let mut by_order: BTreeMap<i32, Vec<LayerKind>> = BTreeMap::new();
        for layer in self.layers.values() {
            by_order.entry(layer.render_order).or_default().push(layer.kind);
        }
        let conflicts: Vec<_> = by_order.into_values().filter(|g| g.len() > 1).collect();
        for group in &conflicts {
            tracing::warn!(layers = ?group, "layers share a render order");
        }
        conflicts
    }

    /// Number of layers created so far.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Created layers in enum order.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    fn layer_entry(&mut self, kind: LayerKind) -> &mut Layer {
        let overrides = &self.overrides;
        self.layers.entry(kind).or_insert_with(|| {
            let render_order = overrides
                .get(&kind)
                .copied()
                .unwrap_or_else(|| kind.default_render_order());
            tracing::debug!(layer = kind.as_str(), render_order, "layer created");
            Layer {
                kind,
                render_order,
                panel_count: 0,
            }
        })
    }

    fn decrement(&mut self, kind: LayerKind) {
        if let Some(layer) = self.layers.get_mut(&kind) {
            layer.panel_count = layer.panel_count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_order_follows_enum_order() {
        let orders: Vec<_> = LayerKind::ALL
            .iter()
            .map(|k| k.default_render_order())
            .collect();
        assert!(orders.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn layers_are_created_lazily() {
        let mut registry = LayerRegistry::new();
        assert_eq!(registry.layer_count(), 0);
        assert!(registry.layer(LayerKind::Popup).is_none());

        registry.get_or_create_layer(LayerKind::Popup);
        assert_eq!(registry.layer_count(), 1);
        assert_eq!(
            registry.layer(LayerKind::Popup).map(|l| l.render_order),
            Some(2 * RENDER_ORDER_STEP)
        );
    }

    #[test]
    fn layers_iterate_in_enum_order() {
        let mut registry = LayerRegistry::new();
        registry.get_or_create_layer(LayerKind::Top);
        registry.get_or_create_layer(LayerKind::Background);
        registry.get_or_create_layer(LayerKind::Popup);
        let kinds: Vec<_> = registry.layers().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![LayerKind::Background, LayerKind::Popup, LayerKind::Top]
        );
    }

    #[test]
    fn assign_and_release_track_counts() {
        let mut registry = LayerRegistry::new();
        registry.assign_panel(InstanceId(1), LayerKind::Normal);
        registry.assign_panel(InstanceId(2), LayerKind::Normal);
        registry.assign_panel(InstanceId(3), LayerKind::Popup);
        assert_eq!(registry.panel_count_of(LayerKind::Normal), 2);
        assert_eq!(registry.panel_count_of(LayerKind::Popup), 1);

        assert_eq!(
            registry.release_panel(InstanceId(1)),
            Some(LayerKind::Normal)
        );
        assert_eq!(registry.panel_count_of(LayerKind::Normal), 1);
        assert_eq!(registry.release_panel(InstanceId(1)), None);
    }

    #[test]
    fn reassign_moves_between_layers() {
        let mut registry = LayerRegistry::new();
        registry.assign_panel(InstanceId(7), LayerKind::Normal);
        registry.assign_panel(InstanceId(7), LayerKind::System);
        assert_eq!(registry.panel_count_of(LayerKind::Normal), 0);
        assert_eq!(registry.panel_count_of(LayerKind::System), 1);
        assert_eq!(registry.layer_of(InstanceId(7)), Some(LayerKind::System));

        registry.assign_panel(InstanceId(7), LayerKind::System);
        assert_eq!(registry.panel_count_of(LayerKind::System), 1);
    }

    #[test]
    fn missing_layer_counts_zero() {
        let registry = LayerRegistry::new();
        assert_eq!(registry.panel_count_of(LayerKind::Debug), 0);
    }

    #[test]
    fn no_conflicts_without_overrides() {
        let mut registry = LayerRegistry::new();
        for kind in LayerKind::ALL {
            registry.get_or_create_layer(kind);
        }
        assert!(registry.detect_order_conflicts().is_empty());
    }

    #[test]
    fn override_can_collide() {
        let mut registry = LayerRegistry::new();
        registry.get_or_create_layer(LayerKind::Popup);
        registry.get_or_create_layer(LayerKind::Top);
        registry.set_render_order(LayerKind::Top, LayerKind::Popup.default_render_order());

        let conflicts = registry.detect_order_conflicts();
        assert_eq!(conflicts, vec![vec![LayerKind::Popup, LayerKind::Top]]);
    }

    #[test]
    fn override_applies_to_layers_created_later() {
        let mut registry = LayerRegistry::new();
        registry.set_render_order(LayerKind::Debug, -5);
        let order = registry.assign_panel(InstanceId(1), LayerKind::Debug);
        assert_eq!(order, -5);
    }
}
