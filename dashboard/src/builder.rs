//! Builds the [`Catalog`] from the four reference tables.
//!
//! Stages run strictly in order (categories, templates, layers,
//! relationships) because each stage links against the maps built before it.
//! The first failing stage aborts the rest.

use crate::entities::{Catalog, Category, CategoryId, LayerId, LayerWrapper, Link, Template, TemplateId};
use crate::error::{DashboardError, LoadStage};
use crate::materializer::Materializer;
use crate::remote::TableClient;
use indexmap::IndexMap;
use shared::{Query, Row, fields};
use std::sync::Arc;

pub struct EntityBuilder {
    client: Arc<dyn TableClient>,
    materializer: Arc<Materializer>,
}

impl EntityBuilder {
    pub fn new(client: Arc<dyn TableClient>, materializer: Arc<Materializer>) -> Self {
        Self {
            client,
            materializer,
        }
    }

    /// Runs the whole load sequence. Live layers keep materializing in the
    /// background after this returns.
    pub async fn load(&self) -> Result<Catalog, DashboardError> {
        let categories = self.fetch_categories().await?;
        log::debug!("Loaded {} categories", categories.len());

        let templates = self.fetch_templates().await?;
        log::debug!("Loaded {} templates", templates.len());

        let mut catalog = Catalog {
            categories,
            templates,
            layers: IndexMap::new(),
        };

        self.fetch_layers(&mut catalog).await?;
        log::debug!("Loaded {} layers", catalog.layers.len());

        let links = self.fetch_relationships().await?;
        link_relationships(&mut catalog, &links);
        log::debug!("Loaded {} template layer relationships", links.len());

        Ok(catalog)
    }

    /// Re-runs the template and relationship stages against an existing
    /// catalog. Both queries complete before the catalog changes, so a failure
    /// leaves the previous templates in place.
    pub async fn refetch_templates(&self, catalog: &mut Catalog) -> Result<(), DashboardError> {
        let templates = self.fetch_templates().await?;
        let links = self.fetch_relationships().await?;
        catalog.replace_templates(templates);
        link_relationships(catalog, &links);
        Ok(())
    }

    async fn fetch_categories(&self) -> Result<IndexMap<CategoryId, Category>, DashboardError> {
        let stage = LoadStage::Categories;
        let rows = self.query(stage, Query::all().order_by(&[fields::TITLE])).await?;

        let mut categories = IndexMap::new();
        for row in &rows {
            let id = CategoryId(object_id(stage, row)?);
            categories.insert(id, Category::new(id, row.text(fields::TITLE).unwrap_or_default()));
        }
        Ok(categories)
    }

    async fn fetch_templates(&self) -> Result<IndexMap<TemplateId, Template>, DashboardError> {
        let stage = LoadStage::Templates;
        let rows = self.query(stage, Query::all().order_by(&[fields::TITLE])).await?;

        let mut templates = IndexMap::new();
        for row in &rows {
            let id = TemplateId(object_id(stage, row)?);
            templates.insert(id, Template::new(id, row.text(fields::TITLE).unwrap_or_default()));
        }
        Ok(templates)
    }

    /// Builds wrappers, links each to its category and dispatches its
    /// materialization without waiting for it.
    async fn fetch_layers(&self, catalog: &mut Catalog) -> Result<(), DashboardError> {
        let stage = LoadStage::Layers;
        let query = Query::all()
            .fields(&[
                fields::OBJECTID,
                fields::TITLE,
                fields::URL,
                fields::SCOPE,
                fields::CATEGORYID,
                fields::RENDERER,
                fields::FILTER,
            ])
            .order_by(&[fields::SCOPE, fields::TITLE]);
        let rows = self.query(stage, query).await?;

        for row in &rows {
            let wrapper = layer_wrapper(row)?;
            let id = wrapper.id;
            let requested_category = wrapper.category;

            if !catalog.insert_layer(wrapper) {
                log::warn!("Skipping duplicate layer row {id}");
                continue;
            }
            let Some(wrapper) = catalog.layer(id) else {
                continue;
            };
            if wrapper.category.is_none() {
                match requested_category {
                    Some(category) => log::warn!("Layer {} references unknown category {category}", wrapper.title),
                    None => log::warn!("Layer {} has no category", wrapper.title),
                }
            }
            self.materializer.dispatch(wrapper);
        }
        Ok(())
    }

    /// Relationship rows in OBJECTID order, which is the intra-template
    /// layer order.
    async fn fetch_relationships(&self) -> Result<Vec<(TemplateId, LayerId)>, DashboardError> {
        let stage = LoadStage::Relationships;
        let rows = self.query(stage, Query::all().order_by(&[fields::OBJECTID])).await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let template = row.integer(fields::TEMPLATEID).map(TemplateId);
                let layer = row.integer(fields::LAYERID).map(LayerId);
                if template.is_none() || layer.is_none() {
                    log::debug!("Skipping incomplete relationship row {:?}", row.integer(fields::OBJECTID));
                }
                Some((template?, layer?))
            })
            .collect())
    }

    async fn query(&self, stage: LoadStage, query: Query) -> Result<Vec<Row>, DashboardError> {
        self.client
            .query(stage.table(), &query)
            .await
            .map_err(|err| DashboardError::from_stage(stage, err))
    }
}

fn link_relationships(catalog: &mut Catalog, links: &[(TemplateId, LayerId)]) {
    for &(template, layer) in links {
        match catalog.link(template, layer) {
            Link::Linked => {}
            // Stale rows for deleted layers are expected.
            Link::MissingLayer => log::debug!("Skipping relationship {template} -> {layer}: unknown layer"),
            Link::MissingTemplate => log::debug!("Skipping relationship {template} -> {layer}: unknown template"),
            Link::Duplicate => log::debug!("Skipping repeated relationship {template} -> {layer}"),
        }
    }
}

fn object_id(stage: LoadStage, row: &Row) -> Result<i64, DashboardError> {
    row.integer(fields::OBJECTID).ok_or_else(|| DashboardError::Query {
        stage,
        message: format!("row without {}: {:?}", fields::OBJECTID, row.attributes()),
    })
}

fn layer_wrapper(row: &Row) -> Result<LayerWrapper, DashboardError> {
    let id = LayerId(object_id(LoadStage::Layers, row)?);
    let title = row.text(fields::TITLE).unwrap_or_default();
    let title = match row.text(fields::SCOPE).filter(|scope| !scope.trim().is_empty()) {
        Some(scope) => format!("{scope} {title}"),
        None => title,
    };

    Ok(LayerWrapper {
        filter: row.text(fields::FILTER).filter(|filter| !filter.trim().is_empty()),
        renderer: row.text(fields::RENDERER).filter(|renderer| !renderer.trim().is_empty()),
        category: row.integer(fields::CATEGORYID).map(CategoryId),
        ..LayerWrapper::new(id, title, row.text(fields::URL).unwrap_or_default())
    })
}
