//! 状态枚举的Postgres编解码，数据库中以VARCHAR存储

use sqlx::{
    encode::IsNull,
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef},
    Decode, Encode, Postgres, Type,
};

use crate::entities::{ExecutorStatus, JobStatus, SlaveStatus, TaskStatus, UrlStatus};

macro_rules! impl_pg_varchar {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Type<Postgres> for $ty {
                fn type_info() -> PgTypeInfo {
                    PgTypeInfo::with_name("VARCHAR")
                }

                fn compatible(ty: &PgTypeInfo) -> bool {
                    <&str as Type<Postgres>>::compatible(ty)
                }
            }

            impl<'r> Decode<'r, Postgres> for $ty {
                fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                    let raw = <&str as Decode<Postgres>>::decode(value)?;
                    Ok(raw.parse::<$ty>()?)
                }
            }

            impl<'q> Encode<'q, Postgres> for $ty {
                fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
                    <&str as Encode<Postgres>>::encode(self.as_str(), buf)
                }
            }
        )+
    };
}

impl_pg_varchar!(JobStatus, TaskStatus, SlaveStatus, ExecutorStatus, UrlStatus);
