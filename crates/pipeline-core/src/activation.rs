use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{BUILT_IN_VIEW_KEY, PreferenceStore, ViewStore};
use crate::view::{BuiltInView, CustomView, View, ViewSelection, catalog};

/// Which kind of view the user has switched to.
///
/// While a custom view is active the local built-in preference is gone;
/// while none is, the preference (if any) names the built-in to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    NoActiveCustomView {
        built_in_preference: Option<BuiltInView>,
    },
    ActiveCustomView(Uuid),
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("unknown custom view: {0}")]
    UnknownView(Uuid),
    #[error("failed to update view activation: {0}")]
    Store(#[source] anyhow::Error),
    #[error("failed to save view preference: {0}")]
    Preference(#[source] anyhow::Error),
}

pub struct ViewActivation<V, P> {
    views: Arc<V>,
    prefs: Arc<P>,
    custom: Vec<CustomView>,
    state: ActivationState,
}

impl<V, P> ViewActivation<V, P>
where
    V: ViewStore,
    P: PreferenceStore,
{
    #[tracing::instrument(skip_all)]
    pub async fn load(views: Arc<V>, prefs: Arc<P>) -> Result<Self, ActivationError> {
        let custom = views.list().await.map_err(ActivationError::Store)?;
        let mut activation = Self {
            views,
            prefs,
            custom,
            state: ActivationState::NoActiveCustomView {
                built_in_preference: None,
            },
        };
        activation.state = activation.derive_state();
        debug!(state = ?activation.state, "loaded view activation");
        Ok(activation)
    }

    pub fn current(&self) -> ActivationState {
        self.state
    }

    pub fn selection(&self) -> Option<ViewSelection> {
        match self.state {
            ActivationState::ActiveCustomView(id) => Some(ViewSelection::Custom(id)),
            ActivationState::NoActiveCustomView {
                built_in_preference,
            } => built_in_preference.map(ViewSelection::BuiltIn),
        }
    }

    pub fn custom_views(&self) -> &[CustomView] {
        &self.custom
    }

    pub fn catalog(&self) -> Vec<View> {
        catalog(self.custom.clone())
    }

    pub fn preferences(&self) -> &Arc<P> {
        &self.prefs
    }

    pub async fn select(&mut self, selection: ViewSelection) -> Result<(), ActivationError> {
        match selection {
            ViewSelection::BuiltIn(view) => self.select_built_in(view).await,
            ViewSelection::Custom(id) => self.select_custom(id).await,
        }
    }

    /// Deactivates every custom view before recording the built-in locally.
    /// A failed deactivation leaves both the store and the state as they were.
    #[tracing::instrument(skip(self), fields(view = view.key()))]
    pub async fn select_built_in(&mut self, view: BuiltInView) -> Result<(), ActivationError> {
        self.views
            .deactivate_all_custom()
            .await
            .map_err(ActivationError::Store)?;
        for custom in &mut self.custom {
            custom.is_active = false;
        }

        let previous = self.built_in_preference();
        if let Err(err) = self.prefs.set(BUILT_IN_VIEW_KEY, view.key()) {
            self.state = ActivationState::NoActiveCustomView {
                built_in_preference: previous,
            };
            return Err(ActivationError::Preference(err));
        }

        self.state = ActivationState::NoActiveCustomView {
            built_in_preference: Some(view),
        };
        info!("switched to built-in view");
        Ok(())
    }

    /// Activates `id` in the store, which clears every other active flag,
    /// then drops the local built-in preference.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn select_custom(&mut self, id: Uuid) -> Result<(), ActivationError> {
        if !self.custom.iter().any(|view| view.id == id) {
            self.custom = self.views.list().await.map_err(ActivationError::Store)?;
            if !self.custom.iter().any(|view| view.id == id) {
                return Err(ActivationError::UnknownView(id));
            }
        }

        self.views
            .activate_custom(id)
            .await
            .map_err(ActivationError::Store)?;
        for custom in &mut self.custom {
            custom.is_active = custom.id == id;
        }

        if let Err(err) = self.prefs.remove(BUILT_IN_VIEW_KEY) {
            warn!(error = %format!("{err:#}"), "could not clear built-in preference");
        }

        self.state = ActivationState::ActiveCustomView(id);
        info!("switched to custom view");
        Ok(())
    }

    /// Re-reads custom views, picking up views created elsewhere.
    pub async fn reload(&mut self) -> Result<(), ActivationError> {
        self.custom = self.views.list().await.map_err(ActivationError::Store)?;
        self.state = self.derive_state();
        Ok(())
    }

    fn built_in_preference(&self) -> Option<BuiltInView> {
        let raw = self.prefs.get(BUILT_IN_VIEW_KEY)?;
        let parsed = BuiltInView::from_key(&raw);
        if parsed.is_none() {
            warn!(value = %raw, "ignoring unknown built-in preference");
        }
        parsed
    }

    fn derive_state(&self) -> ActivationState {
        let mut active = self.custom.iter().filter(|view| view.is_active);
        match active.next() {
            Some(first) => {
                if active.next().is_some() {
                    warn!(id = %first.id, "several custom views flagged active; using the first");
                }
                ActivationState::ActiveCustomView(first.id)
            }
            None => ActivationState::NoActiveCustomView {
                built_in_preference: self.built_in_preference(),
            },
        }
    }
}
