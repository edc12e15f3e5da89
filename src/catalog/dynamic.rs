//! Schema-driven object with no compiled implementation

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{DistributedObject, FieldError, FieldValue};

/// Stores the latest value of every accepted field
#[derive(Debug, Clone)]
pub struct DynamicObject {
    class_name: String,
    accepted: Arc<BTreeSet<String>>,
    values: BTreeMap<String, FieldValue>,
}

impl DynamicObject {
    pub fn new(class_name: &str, accepted: Arc<BTreeSet<String>>) -> Self {
        Self {
            class_name: class_name.to_string(),
            accepted,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }
}

impl DistributedObject for DynamicObject {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn apply_field(&mut self, field: &str, value: FieldValue) -> Result<(), FieldError> {
        if !self.accepted.contains(field) {
            return Err(FieldError::Unknown {
                class: self.class_name.clone(),
                field: field.to_string(),
            });
        }
        self.values.insert(field.to_string(), value);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_get() {
        let accepted = Arc::new(BTreeSet::from(["setName".to_string()]));
        let mut object = DynamicObject::new("DistributedAvatar", accepted);

        object
            .apply_field("setName", FieldValue::Str("Flippy".to_string()))
            .unwrap();
        object
            .apply_field("setName", FieldValue::Str("Flippy II".to_string()))
            .unwrap();
        assert_eq!(
            object.get("setName"),
            Some(&FieldValue::Str("Flippy II".to_string()))
        );

        let err = object.apply_field("setHp", FieldValue::Int(15)).unwrap_err();
        assert!(matches!(err, FieldError::Unknown { .. }));
        assert_eq!(object.values().len(), 1);
    }
}
