mod external_fields;
