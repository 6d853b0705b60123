use std::str::FromStr;

use axum::extract::{Extension, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use model::{Actor, Category, Product, ProductPage, ProductQuery};
use rust_decimal::Decimal;
use serde::Deserialize;
use service::catalog::MAX_IMAGES;
use service::{ImageUpload, NewProduct, ProductUpdate, ServiceError};
use tracing::debug;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, ApiResult, AppJson, AppPath, AppQuery, ok};

/// Per-file upload cap.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Text fields and files of a product form.
#[derive(Default)]
struct ProductForm {
    name: Option<String>,
    description: Option<String>,
    price: Option<String>,
    category: Option<String>,
    stock: Option<String>,
    images: Vec<ImageUpload>,
}

fn invalid(msg: impl Into<String>) -> ApiError {
    ServiceError::Validation(msg.into()).into()
}

async fn read_form(mut multipart: Multipart) -> Result<ProductForm, ApiError> {
    let mut form = ProductForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "images" || name == "image" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().map(str::to_string);
            if !content_type.as_deref().is_some_and(|ct| ct.starts_with("image/")) {
                return Err(invalid(format!("{file_name} is not an image")));
            }
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            if bytes.len() > MAX_IMAGE_BYTES {
                return Err(invalid(format!("{file_name} exceeds 5 MB")));
            }
            if form.images.len() == MAX_IMAGES {
                return Err(invalid(format!("At most {MAX_IMAGES} images are allowed")));
            }
            form.images.push(ImageUpload {
                file_name,
                content_type,
                bytes,
            });
            continue;
        }
        let value = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let slot = match name.as_str() {
            "name" => &mut form.name,
            "description" => &mut form.description,
            "price" => &mut form.price,
            "category" => &mut form.category,
            "stock" => &mut form.stock,
            other => {
                debug!(field = other, "Ignoring unknown form field");
                continue;
            }
        };
        *slot = Some(value);
    }
    Ok(form)
}

fn parse<T: FromStr>(field: &str, value: &str) -> Result<T, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(format!("Invalid {field}: {value}")))
}

fn parse_category(value: &str) -> Result<Category, ApiError> {
    Category::from_str(value).map_err(|e| invalid(e.to_string()))
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| invalid(format!("{field} is required")))
}

pub async fn list(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ProductQuery>,
) -> ApiResult<ProductPage> {
    let page = state.services.catalog.list(query).await?;
    Ok(ok(page, "Products fetched"))
}

pub async fn details(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Product> {
    let product = state.services.catalog.get(id).await?;
    Ok(ok(product, "Product fetched"))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart).await?;
    let input = NewProduct {
        name: required("name", form.name)?,
        description: required("description", form.description)?,
        price: parse::<Decimal>("price", &required("price", form.price)?)?,
        category: parse_category(&required("category", form.category)?)?,
        stock: parse::<i32>("stock", &required("stock", form.stock)?)?,
    };
    let product = state
        .services
        .catalog
        .create(actor, input, form.images)
        .await?;
    Ok((StatusCode::CREATED, ok(product, "Product created")).into_response())
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppPath(id): AppPath<Uuid>,
    multipart: Multipart,
) -> ApiResult<Product> {
    let form = read_form(multipart).await?;
    let update = ProductUpdate {
        name: form.name,
        description: form.description,
        price: form
            .price
            .map(|p| parse::<Decimal>("price", &p))
            .transpose()?,
        category: form.category.map(|c| parse_category(&c)).transpose()?,
    };
    let product = state
        .services
        .catalog
        .update(actor, id, update, form.images)
        .await?;
    Ok(ok(product, "Product updated"))
}

#[derive(Deserialize)]
pub struct StockInput {
    stock: i32,
}

pub async fn update_stock(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppPath(id): AppPath<Uuid>,
    AppJson(input): AppJson<StockInput>,
) -> ApiResult<Product> {
    let product = state
        .services
        .catalog
        .update_stock(actor, id, input.stock)
        .await?;
    Ok(ok(product, "Stock updated"))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Product> {
    let product = state.services.catalog.remove(actor, id).await?;
    Ok(ok(product, "Product removed"))
}

pub async fn seller_products(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<Product>> {
    let products = state.services.catalog.seller_products(actor).await?;
    Ok(ok(products, "Seller products fetched"))
}
