use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub version: i64,
    pub org_id: i64,
    pub dashboard_id: i64,
    pub panel_id: i64,
    pub name: String,
    pub message: String,
    pub severity: String,
    pub state: String,
    pub handler: i64,
    pub silenced: bool,
    pub execution_error: String,
    pub frequency: i64,
    pub eval_data: Option<Json>,
    pub eval_date: Option<DateTimeWithTimeZone>,
    pub new_state_date: DateTimeWithTimeZone,
    pub state_changes: i32,
    pub created: DateTimeWithTimeZone,
    pub updated: DateTimeWithTimeZone,
    pub settings: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
