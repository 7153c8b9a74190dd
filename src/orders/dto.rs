use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::{
    LineStatus, NewOrder, NewOrderMeal, Order, OrderMeal, OrderQuery, OrderStatus, Review,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub table_no: i32,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub items: Vec<NewOrderMeal>,
}

impl CreateOrderRequest {
    pub fn into_new_order(self) -> NewOrder {
        NewOrder {
            table_no: self.table_no,
            notes: self.notes,
            meals: self.items,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersQuery {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub older_than: Option<OffsetDateTime>,
    pub page_size: Option<u32>,
    pub only_pending: Option<bool>,
}

impl From<OrdersQuery> for OrderQuery {
    fn from(q: OrdersQuery) -> Self {
        OrderQuery {
            older_than: q.older_than,
            page_size: q.page_size.unwrap_or_default(),
            only_pending: q.only_pending.unwrap_or(false),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: i64,
    pub table_no: i32,
    pub notes: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub meal_id: i64,
    pub meal_name: String,
    pub quantity: i32,
    pub completed: i32,
    pub status: LineStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub id: i64,
    pub rating: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub photo_urls: Vec<String>,
}

impl From<&Order> for OrderResponse {
    fn from(o: &Order) -> Self {
        Self {
            id: o.id,
            table_no: o.table_no,
            notes: o.notes.clone(),
            created_at: o.created_at,
            status: o.status(),
            items: o.meals.iter().map(OrderItemResponse::from).collect(),
            review: o.review.as_ref().map(ReviewResponse::from),
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        Self::from(&o)
    }
}

impl From<&OrderMeal> for OrderItemResponse {
    fn from(m: &OrderMeal) -> Self {
        Self {
            meal_id: m.meal_id,
            meal_name: m.meal_name.clone(),
            quantity: m.quantity,
            completed: m.completed,
            status: m.status(),
        }
    }
}

impl From<&Review> for ReviewResponse {
    fn from(r: &Review) -> Self {
        Self {
            id: r.id,
            rating: r.rating,
            comment: r.comment.clone(),
            photo_urls: r.photo_urls.clone(),
        }
    }
}
